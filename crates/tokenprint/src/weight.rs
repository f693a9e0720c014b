//! Page and cluster weighting: how much evidentiary value a page carries.

use std::collections::{BTreeMap, BTreeSet};

use crate::cluster::ClusterSet;
use crate::similarity::jaccard;
use crate::types::{Page, PageId, PageStatus, PageWeight, WeightReason, WeightSignal};

const BASE: f64 = 0.30;
const RULE_DENSITY_MAX: f64 = 0.30;
const TEMPLATE_ROLE: f64 = 0.15;
const NOISE_FREE_MAX: f64 = 0.20;
const DUPLICATE_PENALTY: f64 = 0.30;
const RENDER_INCOMPLETE_PENALTY: f64 = 0.25;

/// Distinct rules at which rule density saturates.
const RULE_SATURATION: f64 = 40.0;
/// Third-party scripts/iframes at which the noise-free term reaches zero.
const NOISE_SATURATION: f64 = 5.0;
/// Shingle overlap at which two pages are considered duplicates.
const DUPLICATE_OVERLAP: f64 = 0.90;
/// Multiplier applied to single-page clusters.
const SINGLETON_FACTOR: f64 = 0.6;

/// Templates that represent a site's core design language.
const REPRESENTATIVE_TEMPLATES: [&str; 4] = ["home", "pricing", "docs", "product"];

/// Raw per-page inputs to the weighter. `None` means the signal could not
/// be observed.
#[derive(Debug, Clone, Default)]
pub struct QualitySignals {
    pub distinct_rules: Option<usize>,
    pub has_hero: Option<bool>,
    pub third_party_noise: Option<usize>,
    /// Hashed word shingles of the page text.
    pub shingles: Option<BTreeSet<u64>>,
    pub render_incomplete: bool,
}

fn reason(signal: WeightSignal, contribution: f64, detail: impl Into<String>) -> WeightReason {
    WeightReason {
        signal,
        contribution,
        detail: detail.into(),
    }
}

fn unknown(term: &str, max: f64) -> WeightReason {
    reason(
        WeightSignal::UnknownSignal,
        max / 2.0,
        format!("{term} not observable; neutral midpoint"),
    )
}

/// Compute page weights for every clustered page and set each cluster's
/// `cluster_weight`. Never fails; missing signals take neutral values.
pub fn weigh(
    pages: &[Page],
    clusters: &mut ClusterSet,
    signals: &BTreeMap<PageId, QualitySignals>,
) -> Vec<PageWeight> {
    let by_id: BTreeMap<&PageId, &Page> = pages.iter().map(|p| (&p.id, p)).collect();
    let empty = QualitySignals::default();
    let duplicates = find_duplicates(clusters, signals);

    let mut weights: Vec<PageWeight> = Vec::new();
    for cluster in clusters.clusters() {
        for member in &cluster.members {
            let Some(page) = by_id.get(member) else {
                continue;
            };
            let s = signals.get(member).unwrap_or(&empty);
            let mut reasons = vec![reason(WeightSignal::Base, BASE, "base weight")];

            reasons.push(match s.distinct_rules {
                Some(n) => reason(
                    WeightSignal::RuleDensity,
                    RULE_DENSITY_MAX * (n as f64 / RULE_SATURATION).min(1.0),
                    format!("{n} distinct style rules"),
                ),
                None => unknown("rule density", RULE_DENSITY_MAX),
            });

            let representative_template = REPRESENTATIVE_TEMPLATES.contains(&cluster.template.as_str());
            reasons.push(match (representative_template, s.has_hero) {
                (true, _) => reason(
                    WeightSignal::TemplateRole,
                    TEMPLATE_ROLE,
                    format!("representative template '{}'", cluster.template),
                ),
                (false, Some(true)) => reason(WeightSignal::TemplateRole, TEMPLATE_ROLE, "hero section present"),
                (false, Some(false)) => reason(WeightSignal::TemplateRole, 0.0, "no representative role"),
                (false, None) => unknown("template role", TEMPLATE_ROLE),
            });

            reasons.push(match s.third_party_noise {
                Some(k) => reason(
                    WeightSignal::NoiseFree,
                    NOISE_FREE_MAX * (1.0 - (k as f64 / NOISE_SATURATION).min(1.0)),
                    format!("{k} third-party scripts/iframes"),
                ),
                None => unknown("third-party noise", NOISE_FREE_MAX),
            });

            if let Some(original) = duplicates.get(member) {
                reasons.push(reason(
                    WeightSignal::DuplicatePenalty,
                    -DUPLICATE_PENALTY,
                    format!("near-duplicate of {original}"),
                ));
            }

            if s.render_incomplete || page.status == PageStatus::Partial {
                reasons.push(reason(
                    WeightSignal::RenderIncompletePenalty,
                    -RENDER_INCOMPLETE_PENALTY,
                    "capture incomplete",
                ));
            }

            let quality_weight = reasons.iter().map(|r| r.contribution).sum::<f64>().clamp(0.0, 1.0);
            tracing::debug!("Page {} quality_weight {:.3}", member, quality_weight);
            weights.push(PageWeight {
                page_id: member.clone(),
                quality_weight,
                reasons,
            });
        }
    }
    weights.sort_by(|a, b| a.page_id.cmp(&b.page_id));

    let lookup: BTreeMap<&PageId, f64> = weights.iter().map(|w| (&w.page_id, w.quality_weight)).collect();
    for cluster in clusters.clusters_mut() {
        let member_weights: Vec<f64> = cluster
            .members
            .iter()
            .filter_map(|m| lookup.get(m).copied())
            .collect();
        let total: f64 = member_weights.iter().sum();
        let mean = if total > 0.0 {
            member_weights.iter().map(|w| w * w).sum::<f64>() / total
        } else {
            0.0
        };
        let factor = if cluster.is_singleton() { SINGLETON_FACTOR } else { 1.0 };
        cluster.cluster_weight = (mean * factor).clamp(0.0, 1.0);
    }

    weights
}

/// Pages whose text nearly duplicates an earlier page (by id) in the same
/// cluster, mapped to that earlier page.
fn find_duplicates(
    clusters: &ClusterSet,
    signals: &BTreeMap<PageId, QualitySignals>,
) -> BTreeMap<PageId, PageId> {
    let mut found = BTreeMap::new();
    for cluster in clusters.clusters() {
        for (i, later) in cluster.members.iter().enumerate() {
            let Some(later_sh) = signals.get(later).and_then(|s| s.shingles.as_ref()) else {
                continue;
            };
            if later_sh.is_empty() {
                continue;
            }
            for earlier in &cluster.members[..i] {
                let Some(earlier_sh) = signals.get(earlier).and_then(|s| s.shingles.as_ref()) else {
                    continue;
                };
                if !earlier_sh.is_empty() && jaccard(earlier_sh, later_sh) >= DUPLICATE_OVERLAP {
                    found.insert(later.clone(), earlier.clone());
                    break;
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster_pages;
    use crate::config::ClusterConfig;
    use crate::signature::StructuralSignature;

    fn page(id: &str, hint: &str, status: PageStatus) -> Page {
        Page {
            id: PageId::new(id),
            url: format!("https://acme.test/{id}"),
            cluster_hint: Some(hint.to_string()),
            status,
            signature: StructuralSignature::default(),
            insufficient_style: false,
        }
    }

    fn signals(rules: usize, noise: usize, text: &[u64]) -> QualitySignals {
        QualitySignals {
            distinct_rules: Some(rules),
            has_hero: Some(false),
            third_party_noise: Some(noise),
            shingles: Some(text.iter().copied().collect()),
            render_incomplete: false,
        }
    }

    #[test]
    fn test_weights_are_bounded_and_explained() {
        let pages = vec![page("a", "docs", PageStatus::Ok), page("b", "docs", PageStatus::Ok)];
        let mut set = cluster_pages(&pages, &ClusterConfig::default());
        let sig: BTreeMap<PageId, QualitySignals> = [
            (PageId::new("a"), signals(80, 0, &[1, 2, 3])),
            (PageId::new("b"), signals(20, 10, &[4, 5, 6])),
        ]
        .into_iter()
        .collect();
        let weights = weigh(&pages, &mut set, &sig);

        assert_eq!(weights.len(), 2);
        // base + full density + representative template + noise-free
        assert!((weights[0].quality_weight - 0.95).abs() < 1e-9);
        // base + half density + template, all noise
        assert!((weights[1].quality_weight - 0.60).abs() < 1e-9);
        for w in &weights {
            assert!((0.0..=1.0).contains(&w.quality_weight));
            assert!(!w.reasons.is_empty());
        }
        let cw = set.clusters()[0].cluster_weight;
        assert!(cw > 0.60 && cw < 0.95);
    }

    #[test]
    fn test_unknown_signals_take_midpoint() {
        let pages = vec![page("a", "misc", PageStatus::Ok)];
        let mut set = cluster_pages(&pages, &ClusterConfig::default());
        let weights = weigh(&pages, &mut set, &BTreeMap::new());
        // 0.30 + 0.15 + 0.075 + 0.10
        assert!((weights[0].quality_weight - 0.625).abs() < 1e-9);
        assert!(weights[0]
            .reasons
            .iter()
            .any(|r| r.signal == WeightSignal::UnknownSignal));
        // singleton penalty
        assert!((set.clusters()[0].cluster_weight - 0.625 * 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_and_partial_penalties() {
        let pages = vec![
            page("a", "blog", PageStatus::Ok),
            page("b", "blog", PageStatus::Partial),
        ];
        let mut set = cluster_pages(&pages, &ClusterConfig::default());
        let text: Vec<u64> = (0..20).collect();
        let sig: BTreeMap<PageId, QualitySignals> = [
            (PageId::new("a"), signals(40, 0, &text)),
            (PageId::new("b"), signals(40, 0, &text)),
        ]
        .into_iter()
        .collect();
        let weights = weigh(&pages, &mut set, &sig);

        let a = &weights[0];
        let b = &weights[1];
        assert!((a.quality_weight - 0.80).abs() < 1e-9);
        assert!(b.reasons.iter().any(|r| r.signal == WeightSignal::DuplicatePenalty));
        assert!(b
            .reasons
            .iter()
            .any(|r| r.signal == WeightSignal::RenderIncompletePenalty));
        assert!((b.quality_weight - 0.25).abs() < 1e-9);
    }
}
