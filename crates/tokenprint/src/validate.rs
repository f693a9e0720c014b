//! Consistency and risk rules over one aggregation generation.
//!
//! Each rule family reads the generation and observations and writes only
//! findings. Contrast and missing-state findings carry a patch; the
//! patched values are reported as [`Adjustment`]s next to the untouched
//! canonical value.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::aggregate::{equivalent, Generation};
use crate::color::{adjust_lightness_for_contrast, contrast_ratio, WCAG_AA_BODY, WCAG_AA_LARGE};
use crate::config::{RunConfig, Tolerances};
use crate::similarity::edit_similarity;
use crate::types::{
    ComponentAnatomy, EvidenceObservation, FallbackResolution, FindingKind, FindingPatch, FindingTarget,
    ObservedValue, PageId, Severity, StateCoverage, ValidationFinding,
};

/// Canonical subcategories that claim the same role and must agree.
const EXCLUSIVE_ROLES: [(&str, &str, &str); 2] = [
    ("brand.primary", "color.brand_primary", "color.brand_declared"),
    ("font.body", "typography.font_family.body", "typography.font_family.declared"),
];

/// Foreground, background, required ratio.
const CONTRAST_PAIRS: [(&str, &str, f64); 4] = [
    ("color.text", "color.background", WCAG_AA_BODY),
    ("color.link", "color.background", WCAG_AA_BODY),
    ("color.heading", "color.background", WCAG_AA_LARGE),
    ("color.on_brand", "color.brand_primary", WCAG_AA_BODY),
];

/// A value the validator patched, kept beside the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub subcategory: String,
    pub original: ObservedValue,
    pub adjusted: ObservedValue,
    pub finding_ids: Vec<String>,
}

/// Findings and patches produced by one validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub findings: Vec<ValidationFinding>,
    pub adjustments: Vec<Adjustment>,
    /// Subcategories in a contradiction, deflated on re-aggregation.
    pub contradicted: BTreeSet<String>,
}

fn finding(
    kind: FindingKind,
    target: FindingTarget,
    severity: Severity,
    remediation: String,
    patch: Option<FindingPatch>,
    generation: u32,
) -> ValidationFinding {
    ValidationFinding {
        id: format!("{kind}:{target}"),
        kind,
        target,
        severity,
        remediation,
        patch,
        generation,
    }
}

/// Run every rule family against one generation.
pub fn validate(generation: &Generation, observations: &[EvidenceObservation], config: &RunConfig) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let (contradictions, contradicted) = contradictions(generation, config);
    outcome.findings.extend(contradictions);
    outcome.contradicted = contradicted;

    let (missing, placeholders) = missing_states(generation);
    outcome.findings.extend(missing);
    outcome.adjustments.extend(placeholders);

    let (contrast, patched) = contrast_risks(generation);
    outcome.findings.extend(contrast);
    outcome.adjustments.extend(patched);

    outcome.findings.extend(copying_risks(generation, observations, &config.tolerances));
    outcome.findings.extend(low_confidence(generation, config));

    outcome.findings.sort_by(|a, b| (a.kind, &a.target).cmp(&(b.kind, &b.target)));
    tracing::info!(
        "Generation {} validation: {} findings, {} adjustments",
        generation.number,
        outcome.findings.len(),
        outcome.adjustments.len()
    );
    outcome
}

/// Canonical values that claim one role but disagree. Both sides are
/// flagged; neither wins.
pub fn contradictions(generation: &Generation, config: &RunConfig) -> (Vec<ValidationFinding>, BTreeSet<String>) {
    let mut findings = Vec::new();
    let mut involved = BTreeSet::new();
    for (role, a, b) in EXCLUSIVE_ROLES {
        let (Some(va), Some(vb)) = (generation.canonical(a), generation.canonical(b)) else {
            continue;
        };
        if equivalent(&va.value, &vb.value, &config.tolerances) {
            continue;
        }
        tracing::warn!(
            "Contradiction on {}: {} = {} vs {} = {}",
            role,
            a,
            va.value.describe(),
            b,
            vb.value.describe()
        );
        for (sub, other, value, other_value) in [(a, b, &va.value, &vb.value), (b, a, &vb.value, &va.value)] {
            findings.push(finding(
                FindingKind::Contradiction,
                FindingTarget::Subcategory {
                    subcategory: sub.to_string(),
                },
                Severity::Critical,
                format!(
                    "{sub} ({}) and {other} ({}) both claim {role}; pick one manually",
                    value.describe(),
                    other_value.describe()
                ),
                None,
                generation.number,
            ));
            involved.insert(sub.to_string());
        }
    }
    (findings, involved)
}

/// Canonical components lacking evidence for a required state. Each gap
/// gets an explicitly labelled placeholder, never a guessed value.
pub fn missing_states(generation: &Generation) -> (Vec<ValidationFinding>, Vec<Adjustment>) {
    let mut findings = Vec::new();
    let mut adjustments = Vec::new();
    for canonical in generation.results.iter().filter_map(|r| r.canonical.as_ref()) {
        let ObservedValue::Component(anatomy) = &canonical.value else {
            continue;
        };
        let mut patched: ComponentAnatomy = anatomy.clone();
        let mut ids = Vec::new();
        for &state in anatomy.role.required_states() {
            let observed = anatomy.states.get(&state).is_some_and(StateCoverage::is_observed);
            if observed {
                continue;
            }
            let label = format!("PLACEHOLDER: {} {} state not observed; design required", anatomy.role, state);
            let f = finding(
                FindingKind::MissingState,
                FindingTarget::ComponentState {
                    role: anatomy.role,
                    state,
                },
                Severity::Warning,
                format!("Design and document the {state} state for {}", anatomy.role),
                Some(FindingPatch::StatePlaceholder {
                    role: anatomy.role,
                    state,
                    label: label.clone(),
                }),
                generation.number,
            );
            ids.push(f.id.clone());
            findings.push(f);
            patched.states.insert(state, StateCoverage::Placeholder { label });
        }
        if !ids.is_empty() {
            adjustments.push(Adjustment {
                subcategory: canonical.subcategory.clone(),
                original: canonical.value.clone(),
                adjusted: ObservedValue::Component(patched),
                finding_ids: ids,
            });
        }
    }
    (findings, adjustments)
}

/// Canonical color pairs below their usage's contrast minimum. The
/// foreground lightness is shifted until the pair passes.
pub fn contrast_risks(generation: &Generation) -> (Vec<ValidationFinding>, Vec<Adjustment>) {
    let mut findings = Vec::new();
    let mut adjustments = Vec::new();
    for (fg_sub, bg_sub, required) in CONTRAST_PAIRS {
        let (Some(fg), Some(bg)) = (generation.canonical(fg_sub), generation.canonical(bg_sub)) else {
            continue;
        };
        let (ObservedValue::Color(fg_color), ObservedValue::Color(bg_color)) = (&fg.value, &bg.value) else {
            continue;
        };
        let ratio = contrast_ratio(*fg_color, *bg_color);
        if ratio >= required {
            continue;
        }

        let target = FindingTarget::Pair {
            foreground: fg_sub.to_string(),
            background: bg_sub.to_string(),
        };
        let patched = adjust_lightness_for_contrast(*fg_color, *bg_color, required);
        let f = match patched {
            Some(p) => finding(
                FindingKind::ContrastRisk,
                target,
                Severity::Warning,
                format!(
                    "{fg_sub} {} on {bg_sub} {} is {ratio:.2}:1 (needs {required:.1}:1); use {} ({:.2}:1)",
                    fg_color.to_hex(),
                    bg_color.to_hex(),
                    p.to_hex(),
                    contrast_ratio(p, *bg_color)
                ),
                Some(FindingPatch::Contrast {
                    original: *fg_color,
                    patched: p,
                    background: *bg_color,
                    original_ratio: ratio,
                    patched_ratio: contrast_ratio(p, *bg_color),
                    required_ratio: required,
                }),
                generation.number,
            ),
            None => finding(
                FindingKind::ContrastRisk,
                target,
                Severity::Critical,
                format!(
                    "{fg_sub} on {bg_sub} is {ratio:.2}:1 and no lightness of this hue reaches {required:.1}:1; change the background"
                ),
                None,
                generation.number,
            ),
        };
        tracing::warn!("Contrast risk: {}", f.remediation);
        if let Some(p) = patched {
            adjustments.push(Adjustment {
                subcategory: fg_sub.to_string(),
                original: fg.value.clone(),
                adjusted: ObservedValue::Color(p),
                finding_ids: vec![f.id.clone()],
            });
        }
        findings.push(f);
    }
    (findings, adjustments)
}

/// Canonical literal sequences (scales, anatomies, call-to-action runs)
/// that only one page reproduces almost verbatim. Sequences shorter than
/// `copying_min_tokens` are too generic to be a copy.
pub fn copying_risks(
    generation: &Generation,
    observations: &[EvidenceObservation],
    tol: &Tolerances,
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    for canonical in generation.results.iter().filter_map(|r| r.canonical.as_ref()) {
        let Some(tokens) = canonical.value.literal_tokens() else {
            continue;
        };
        if tokens.len() < tol.copying_min_tokens {
            continue;
        }
        let matching: BTreeSet<&PageId> = observations
            .iter()
            .filter(|o| o.subcategory == canonical.subcategory)
            .filter(|o| {
                o.value
                    .literal_tokens()
                    .is_some_and(|t| edit_similarity(&t, &tokens) >= tol.copying_similarity)
            })
            .map(|o| &o.page_id)
            .collect();
        if matching.len() != 1 {
            continue;
        }
        let page = matching.iter().next().map(|p| p.to_string()).unwrap_or_default();
        findings.push(finding(
            FindingKind::CopyingRisk,
            FindingTarget::Subcategory {
                subcategory: canonical.subcategory.clone(),
            },
            Severity::Warning,
            format!(
                "{} reproduces the literal structure of page {page}; normalize it into a cross-page pattern",
                canonical.subcategory
            ),
            None,
            generation.number,
        ));
    }
    findings
}

/// Re-assert every subcategory that resolved without consensus.
pub fn low_confidence(generation: &Generation, config: &RunConfig) -> Vec<ValidationFinding> {
    generation
        .low_confidence()
        .map(|result| {
            let emitted = result.fallback.as_ref().is_some_and(FallbackResolution::emits_values);
            let best = result.candidates.first().map(|c| c.confidence).unwrap_or(0.0);
            let remediation = if emitted {
                format!(
                    "{}: best confidence {best:.2} is below {:.2}; fallback values are suggestions, not tokens",
                    result.subcategory,
                    config.threshold()
                )
            } else {
                format!(
                    "{}: best confidence {best:.2} is below {:.2}; value left unknown",
                    result.subcategory,
                    config.threshold()
                )
            };
            finding(
                FindingKind::LowConfidence,
                FindingTarget::Subcategory {
                    subcategory: result.subcategory.clone(),
                },
                if emitted { Severity::Warning } else { Severity::Info },
                remediation,
                None,
                generation.number,
            )
        })
        .collect()
}

/// Merge findings from successive generations by (kind, target); the
/// latest generation's copy wins and nothing is dropped.
pub fn merge_findings(
    earlier: impl IntoIterator<Item = ValidationFinding>,
    later: impl IntoIterator<Item = ValidationFinding>,
) -> Vec<ValidationFinding> {
    let mut merged: BTreeMap<(FindingKind, FindingTarget), ValidationFinding> = BTreeMap::new();
    for f in earlier.into_iter().chain(later) {
        let key = (f.kind, f.target.clone());
        match merged.get(&key) {
            Some(existing) if existing.generation > f.generation => {}
            _ => {
                merged.insert(key, f);
            }
        }
    }
    merged.into_values().collect()
}
