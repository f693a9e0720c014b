//! Evidence aggregation: equivalence classes, weighted confidence, and
//! canonical selection.
//!
//! Every call to [`Aggregator::aggregate`] produces a new immutable
//! [`Generation`]. Re-aggregation after validation never edits an earlier
//! generation; it produces the next one with deflation applied.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterSet;
use crate::color::delta_e;
use crate::config::{FallbackPolicy, RunConfig, Tolerances};
use crate::similarity::edit_similarity;
use crate::types::{
    CanonError, Candidate, CanonicalValue, Category, ClusterId, ComponentAnatomy, EvidenceObservation,
    EvidenceRef, FallbackResolution, ObservedValue, PageId, PageWeight, ResolutionStatus,
    StateCoverage, SubcategoryResult, SuggestedValue,
};

/// One immutable aggregation result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// 1 for the first aggregation, incremented per re-aggregation.
    pub number: u32,
    /// Sorted by subcategory.
    pub results: Vec<SubcategoryResult>,
    /// Confidence multipliers in effect for this generation.
    pub deflations: BTreeMap<String, f64>,
    /// Subcategories held unresolved after an earlier contradiction.
    #[serde(default)]
    pub contested: BTreeSet<String>,
    /// Multiplier applied to every subcategory, below 1.0 for an aborted run.
    #[serde(default = "unit_deflation")]
    pub run_deflation: f64,
}

fn unit_deflation() -> f64 {
    1.0
}

impl Generation {
    pub fn result(&self, subcategory: &str) -> Option<&SubcategoryResult> {
        self.results
            .binary_search_by(|r| r.subcategory.as_str().cmp(subcategory))
            .ok()
            .map(|i| &self.results[i])
    }

    pub fn canonical(&self, subcategory: &str) -> Option<&CanonicalValue> {
        self.result(subcategory).and_then(|r| r.canonical.as_ref())
    }

    pub fn canonical_count(&self) -> usize {
        self.results.iter().filter(|r| r.canonical.is_some()).count()
    }

    pub fn low_confidence(&self) -> impl Iterator<Item = &SubcategoryResult> {
        self.results
            .iter()
            .filter(|r| r.status == ResolutionStatus::LowConfidenceCandidate)
    }
}

/// Whether two observed values fall in the same equivalence class.
pub fn equivalent(a: &ObservedValue, b: &ObservedValue, tol: &Tolerances) -> bool {
    use ObservedValue as V;
    match (a, b) {
        (V::Color(x), V::Color(y)) => delta_e(*x, *y) <= tol.color_delta_e,
        (V::Dimension(x), V::Dimension(y)) => {
            let band = match x.unit {
                crate::types::Unit::Px => tol.length_px,
                crate::types::Unit::Ms => tol.duration_ms,
            };
            x.unit == y.unit && (x.value - y.value).abs() <= band
        }
        (V::Scale(x), V::Scale(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| (p - q).abs() <= tol.spacing_px)
        }
        (V::Text(x), V::Text(y)) => normalize_text(x) == normalize_text(y),
        (V::Number(x), V::Number(y)) => {
            let scale = x.abs().max(y.abs());
            scale == 0.0 || (x - y).abs() <= tol.number_relative * scale
        }
        (V::Shadow(x), V::Shadow(y)) => {
            (x.offset_x - y.offset_x).abs() <= tol.shadow_px
                && (x.offset_y - y.offset_y).abs() <= tol.shadow_px
                && (x.blur - y.blur).abs() <= tol.shadow_px
                && (x.spread - y.spread).abs() <= tol.shadow_px
                && (x.alpha - y.alpha).abs() <= tol.shadow_alpha
        }
        (V::Component(x), V::Component(y)) => {
            x.role == y.role && edit_similarity(&x.anatomy, &y.anatomy) >= tol.anatomy_similarity
        }
        (V::Sequence(_), V::Sequence(_)) => match (a.literal_tokens(), b.literal_tokens()) {
            (Some(x), Some(y)) => edit_similarity(&x, &y) >= tol.anatomy_similarity,
            _ => false,
        },
        _ => false,
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '"' || c == '\'')
        .to_lowercase()
}

/// Combines observations, weights, and cluster memberships into
/// candidates. Holds only borrowed, read-only inputs.
pub struct Aggregator<'a> {
    config: &'a RunConfig,
    by_subcategory: BTreeMap<&'a str, Vec<&'a EvidenceObservation>>,
    /// Normalized `quality_weight × cluster_weight` and cluster per page.
    page_omega: BTreeMap<&'a PageId, (f64, Option<ClusterId>)>,
    run_deflation: f64,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        config: &'a RunConfig,
        observations: &'a [EvidenceObservation],
        weights: &'a [PageWeight],
        clusters: &'a ClusterSet,
    ) -> Self {
        let mut page_omega: BTreeMap<&PageId, (f64, Option<ClusterId>)> = weights
            .iter()
            .map(|w| {
                let cluster = clusters.cluster_of(&w.page_id);
                let cluster_weight = cluster
                    .and_then(|id| clusters.get(id))
                    .map(|c| c.cluster_weight)
                    .unwrap_or(0.0);
                (&w.page_id, (w.quality_weight * cluster_weight, cluster))
            })
            .collect();
        let max = page_omega.values().map(|(w, _)| *w).fold(0.0, f64::max);
        for (omega, _) in page_omega.values_mut() {
            *omega = if max > 0.0 { *omega / max } else { 0.0 };
        }

        let mut by_subcategory: BTreeMap<&str, Vec<&EvidenceObservation>> = BTreeMap::new();
        for obs in observations {
            by_subcategory.entry(obs.subcategory.as_str()).or_default().push(obs);
        }
        for list in by_subcategory.values_mut() {
            list.sort_by(|a, b| a.id.cmp(&b.id));
        }

        Self {
            config,
            by_subcategory,
            page_omega,
            run_deflation: 1.0,
        }
    }

    /// Scale every confidence by `factor`; used to degrade an aborted run.
    pub fn with_run_deflation(mut self, factor: f64) -> Self {
        self.run_deflation = factor.clamp(0.0, 1.0);
        self
    }

    fn omega(&self, page: &PageId) -> (f64, Option<ClusterId>) {
        self.page_omega.get(page).copied().unwrap_or((0.0, None))
    }

    /// Aggregate every subcategory into generation `number`, applying the
    /// given per-subcategory confidence deflation.
    pub fn aggregate(&self, number: u32, deflations: &BTreeMap<String, f64>) -> Generation {
        self.aggregate_contested(number, deflations, &BTreeSet::new())
    }

    /// Like [`Aggregator::aggregate`], but every subcategory in `contested`
    /// resolves as [`ResolutionStatus::Contradicted`] whatever its
    /// confidence, so both sides of a contradiction end up the same way.
    pub fn aggregate_contested(
        &self,
        number: u32,
        deflations: &BTreeMap<String, f64>,
        contested: &BTreeSet<String>,
    ) -> Generation {
        let mut results: Vec<SubcategoryResult> = self
            .by_subcategory
            .par_iter()
            .map(|(sub, obs)| {
                let deflation = deflations.get(*sub).copied().unwrap_or(1.0) * self.run_deflation;
                let mut result = self.resolve(sub, obs, deflation);
                if contested.contains(*sub) {
                    self.hold_contested(&mut result);
                }
                result
            })
            .collect();
        results.sort_by(|a, b| a.subcategory.cmp(&b.subcategory));

        for r in &results {
            if r.status == ResolutionStatus::LowConfidenceCandidate {
                let best = r.candidates.first().map(|c| c.confidence).unwrap_or(0.0);
                tracing::info!(
                    "{}",
                    CanonError::NoConsensus {
                        subcategory: r.subcategory.clone(),
                        best,
                        threshold: self.config.threshold(),
                    }
                );
            }
        }
        tracing::info!(
            "Generation {}: {} subcategories, {} canonical",
            number,
            results.len(),
            results.iter().filter(|r| r.canonical.is_some()).count()
        );

        Generation {
            number,
            results,
            deflations: deflations.clone(),
            contested: contested.clone(),
            run_deflation: self.run_deflation,
        }
    }

    fn hold_contested(&self, result: &mut SubcategoryResult) {
        result.status = ResolutionStatus::Contradicted;
        result.canonical = None;
        result.fallback = Some(fallback(
            self.config.low_confidence_fallback,
            &result.candidates,
            self.config.suggestion_count,
        ));
    }

    /// Build equivalence classes for one subcategory and resolve them.
    fn resolve(&self, subcategory: &str, observations: &[&EvidenceObservation], deflation: f64) -> SubcategoryResult {
        let tol = &self.config.tolerances;
        let mut classes: Vec<Vec<&EvidenceObservation>> = Vec::new();
        for &obs in observations {
            match classes.iter_mut().find(|c| equivalent(&c[0].value, &obs.value, tol)) {
                Some(class) => class.push(obs),
                None => classes.push(vec![obs]),
            }
        }

        // Page evidence per class, capped so one page cannot carry a value.
        let cap = self.config.page_evidence_cap;
        let page_evidence: Vec<BTreeMap<&PageId, f64>> = classes
            .iter()
            .map(|class| {
                let mut per_page: BTreeMap<&PageId, f64> = BTreeMap::new();
                for obs in class {
                    let (omega, _) = self.omega(&obs.page_id);
                    let e = (obs.raw_confidence * omega).clamp(0.0, cap);
                    let slot = per_page.entry(&obs.page_id).or_insert(0.0);
                    *slot = slot.max(e);
                }
                per_page
            })
            .collect();
        let masses: Vec<f64> = page_evidence.iter().map(|p| p.values().sum()).collect();
        let total_mass: f64 = masses.iter().sum();

        let mut candidates: Vec<(usize, Candidate)> = classes
            .iter()
            .enumerate()
            .map(|(i, class)| {
                let support = 1.0 - page_evidence[i].values().map(|e| 1.0 - e).product::<f64>();
                let agreement = if total_mass > 0.0 {
                    let rival = (total_mass - masses[i]) / total_mass;
                    1.0 - rival * rival
                } else {
                    1.0
                };
                let confidence = (support * agreement * deflation).clamp(0.0, 1.0);
                (i, self.candidate(subcategory, class, support, agreement, confidence))
            })
            .collect();
        candidates.sort_by(|(ia, a), (ib, b)| b.confidence.total_cmp(&a.confidence).then(ia.cmp(ib)));
        let candidates: Vec<Candidate> = candidates.into_iter().map(|(_, c)| c).collect();

        let category = observations.first().map(|o| o.category).unwrap_or(Category::Visual);
        let best = candidates.first();
        let threshold = self.config.threshold();

        match best {
            Some(top) if top.confidence >= threshold => SubcategoryResult {
                subcategory: subcategory.to_string(),
                category,
                status: ResolutionStatus::Canonical,
                canonical: Some(CanonicalValue {
                    subcategory: subcategory.to_string(),
                    value: top.value.clone(),
                    confidence: top.confidence,
                    evidence: top.evidence.clone(),
                }),
                fallback: None,
                candidates,
            },
            _ => SubcategoryResult {
                subcategory: subcategory.to_string(),
                category,
                status: ResolutionStatus::LowConfidenceCandidate,
                canonical: None,
                fallback: Some(fallback(
                    self.config.low_confidence_fallback,
                    &candidates,
                    self.config.suggestion_count,
                )),
                candidates,
            },
        }
    }

    fn candidate(
        &self,
        subcategory: &str,
        class: &[&EvidenceObservation],
        support: f64,
        agreement: f64,
        confidence: f64,
    ) -> Candidate {
        // Strongest member supplies the representative value.
        let mut strongest = class[0];
        let mut strongest_score = f64::MIN;
        for &obs in class {
            let score = obs.raw_confidence * self.omega(&obs.page_id).0;
            if score > strongest_score {
                strongest = obs;
                strongest_score = score;
            }
        }
        let value = match &strongest.value {
            ObservedValue::Component(anatomy) => ObservedValue::Component(merge_states(anatomy, class)),
            other => other.clone(),
        };

        let evidence: Vec<EvidenceRef> = class
            .iter()
            .map(|obs| EvidenceRef {
                observation: obs.id.clone(),
                page_id: obs.page_id.clone(),
                cluster_id: self.omega(&obs.page_id).1,
            })
            .collect();
        let pages: BTreeSet<PageId> = class.iter().map(|o| o.page_id.clone()).collect();
        let clusters: BTreeSet<ClusterId> = evidence.iter().filter_map(|e| e.cluster_id).collect();

        Candidate {
            subcategory: subcategory.to_string(),
            value,
            confidence,
            support,
            agreement,
            evidence,
            pages: pages.into_iter().collect(),
            clusters: clusters.into_iter().collect(),
        }
    }
}

/// A state counts as observed for the class if any member observed it.
fn merge_states(base: &ComponentAnatomy, class: &[&EvidenceObservation]) -> ComponentAnatomy {
    let mut merged = base.clone();
    for obs in class {
        if let ObservedValue::Component(other) = &obs.value {
            for state in other.observed_states() {
                merged.states.insert(state, StateCoverage::Observed);
            }
        }
    }
    merged
}

/// Apply the fallback policy to a subcategory without consensus.
pub fn fallback(policy: FallbackPolicy, candidates: &[Candidate], suggestion_count: usize) -> FallbackResolution {
    let suggest = || FallbackResolution::Suggested {
        candidates: candidates
            .iter()
            .take(suggestion_count)
            .map(|c| SuggestedValue {
                value: c.value.clone(),
                confidence: c.confidence,
            })
            .collect(),
    };

    match policy {
        FallbackPolicy::SuggestCandidates => suggest(),
        FallbackPolicy::MarkUnknown => FallbackResolution::Unknown,
        FallbackPolicy::InferRanges => infer_range(candidates).unwrap_or_else(suggest),
    }
}

/// Numeric spread over the candidates, when every candidate is numeric in
/// the same unit, or a per-step spread for equal-length scales.
fn infer_range(candidates: &[Candidate]) -> Option<FallbackResolution> {
    let first = candidates.first()?;
    if let ObservedValue::Scale(steps) = &first.value {
        let mut ranges: Vec<(f64, f64)> = steps.iter().map(|s| (*s, *s)).collect();
        for c in &candidates[1..] {
            let ObservedValue::Scale(other) = &c.value else {
                return None;
            };
            if other.len() != ranges.len() {
                return None;
            }
            for (range, v) in ranges.iter_mut().zip(other) {
                range.0 = range.0.min(*v);
                range.1 = range.1.max(*v);
            }
        }
        return Some(FallbackResolution::ScaleRange { steps: ranges });
    }

    let (_, unit) = first.value.magnitude()?;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for c in candidates {
        let (v, u) = c.value.magnitude()?;
        if u != unit {
            return None;
        }
        min = min.min(v);
        max = max.max(v);
    }
    Some(FallbackResolution::Range { min, max, unit })
}
