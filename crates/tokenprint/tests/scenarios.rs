//! End-to-end runs over small inline manifests.
//!
//! Every page below lands in one `docs` cluster with a saturated rule
//! density, so each page's evidence reaches the per-page cap and the
//! expected confidences can be worked out by hand.

mod common;

use common::*;
use tokenprint::color::{contrast_ratio, same_hue_family, Rgb};
use tokenprint::{
    FallbackPolicy, FallbackResolution, FindingKind, FindingPatch, FindingTarget, InteractiveState,
    ObservedValue, PageId, ResolutionStatus, RunConfig, Severity, StateCoverage,
};

// ─────────────────────── helpers ───────────────────────

fn buttons_markup(id: &str) -> String {
    format!(
        r#"<html><body><main>
            <button class="btn">{id} start</button>
            <button class="btn">{id} learn</button>
            <button class="btn">{id} contact</button>
        </main></body></html>"#
    )
}

const BUTTON_CSS: &str = ".btn { padding: 8px } .btn:hover { opacity: 0.8 } .btn:focus { outline: 2px solid }";

const LOW_CONTRAST_CSS: &str = "body { color: #ff6b6b; background: #ffffff } p { color: #ff6b6b } \
    li { color: #ff6b6b } article { color: #ff6b6b } html { background: #ffffff } \
    :root { background-color: #ffffff }";

const CONFLICTING_BRAND_CSS: &str = ":root { --brand-primary: #dc2626; --color-primary: #dc2626 } \
    .btn { background: #2563eb } .button { background: #2563eb } button { background-color: #2563eb }";

// ─────────────────────── corroboration ───────────────────────

#[tokio::test]
async fn test_corroborated_scale_wins_over_outlier() {
    let outcome = run(vec![
        page("p1", SPACING_8PT, None),
        page("p2", SPACING_8PT, None),
        page("p3", SPACING_OUTLIER, None),
    ])
    .await;

    assert_eq!(outcome.bundle.clusters.len(), 1);
    let entry = outcome.bundle.entry("spacing.scale").unwrap();
    assert_eq!(entry.status, ResolutionStatus::Canonical);
    assert_eq!(entry.value, Some(ObservedValue::Scale(vec![8.0, 16.0, 24.0, 32.0])));
    // support 1 - 0.4^2 = 0.84, agreement 1 - (1/3)^2
    assert!((entry.confidence - 0.84 * (8.0 / 9.0)).abs() < 1e-6, "{}", entry.confidence);

    let pages: Vec<&PageId> = entry.evidence.iter().map(|e| &e.page_id).collect();
    assert_eq!(pages, vec![&PageId::new("p1"), &PageId::new("p2")]);

    assert_eq!(entry.accidental_variants.len(), 1);
    let outlier = &entry.accidental_variants[0];
    assert_eq!(outlier.value, ObservedValue::Scale(vec![10.0, 18.0, 22.0]));
    assert!((outlier.confidence - 0.6 * (5.0 / 9.0)).abs() < 1e-6);
    assert_eq!(outlier.pages, vec![PageId::new("p3")]);
}

#[tokio::test]
async fn test_single_page_value_is_never_canonical() {
    let outcome = run(vec![page("solo", SPACING_8PT, None)]).await;
    let entry = outcome.bundle.entry("spacing.scale").unwrap();
    assert_eq!(entry.status, ResolutionStatus::LowConfidenceCandidate);
    assert!(entry.value.is_none());
    assert!(entry.confidence < 0.61);
}

// ─────────────────────── conflicting evidence ───────────────────────

fn three_brands() -> Vec<serde_json::Value> {
    ["#2563eb", "#dc2626", "#16a34a"]
        .iter()
        .enumerate()
        .map(|(i, color)| page(&format!("b{i}"), &format!(".btn {{ background: {color} }}"), None))
        .collect()
}

#[tokio::test]
async fn test_conflicting_brand_colors_yield_suggestions() {
    let outcome = run(three_brands()).await;
    let entry = outcome.bundle.entry("color.brand_primary").unwrap();

    assert_eq!(entry.status, ResolutionStatus::LowConfidenceCandidate);
    assert!(entry.value.is_none());
    assert_eq!(entry.accidental_variants.len(), 3);
    assert!(entry.accidental_variants.iter().all(|c| c.confidence < 0.70));
    match &entry.fallback {
        Some(FallbackResolution::Suggested { candidates }) => assert_eq!(candidates.len(), 3),
        other => panic!("expected suggestions, got {other:?}"),
    }

    let finding = outcome
        .bundle
        .findings
        .iter()
        .find(|f| f.id == "low_confidence:color.brand_primary")
        .unwrap();
    assert_eq!(finding.kind, FindingKind::LowConfidence);
    assert_eq!(finding.severity, Severity::Warning);
}

#[tokio::test]
async fn test_mark_unknown_policy_emits_no_value() {
    let config = RunConfig {
        low_confidence_fallback: FallbackPolicy::MarkUnknown,
        ..fast_config()
    };
    let outcome = run_with(three_brands(), config).await;
    let entry = outcome.bundle.entry("color.brand_primary").unwrap();
    assert!(matches!(entry.fallback, Some(FallbackResolution::Unknown)));
    // variants stay visible even when nothing is suggested
    assert_eq!(entry.accidental_variants.len(), 3);
    let finding = outcome
        .bundle
        .findings
        .iter()
        .find(|f| f.id == "low_confidence:color.brand_primary")
        .unwrap();
    assert_eq!(finding.severity, Severity::Info);
}

// ─────────────────────── components ───────────────────────

#[tokio::test]
async fn test_missing_button_states_get_placeholders() {
    let outcome = run(
        ["c1", "c2", "c3"]
            .iter()
            .map(|id| page(id, BUTTON_CSS, Some(&buttons_markup(id))))
            .collect(),
    )
    .await;

    let entry = outcome.bundle.entry("component.button").unwrap();
    assert_eq!(entry.status, ResolutionStatus::Canonical);
    let Some(ObservedValue::Component(anatomy)) = &entry.value else {
        panic!("expected a component value");
    };
    for state in [InteractiveState::Default, InteractiveState::Hover, InteractiveState::Focus] {
        assert!(anatomy.states[&state].is_observed(), "{state} should be observed");
    }

    let missing: Vec<&str> = outcome
        .bundle
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::MissingState)
        .map(|f| f.id.as_str())
        .collect();
    assert_eq!(
        missing,
        vec!["missing_state:component.button:disabled", "missing_state:component.button:loading"]
    );

    // the canonical value keeps the gap; the adjustment carries the label
    assert_eq!(anatomy.states[&InteractiveState::Disabled], StateCoverage::Missing);
    let adjustment = &entry.adjustments[0];
    let ObservedValue::Component(patched) = &adjustment.adjusted else {
        panic!("expected a patched component");
    };
    assert_eq!(
        patched.states[&InteractiveState::Loading],
        StateCoverage::Placeholder {
            label: "PLACEHOLDER: button loading state not observed; design required".into()
        }
    );
    assert_eq!(adjustment.finding_ids.len(), 2);
}

// ─────────────────────── accessibility ───────────────────────

#[tokio::test]
async fn test_low_contrast_text_is_patched() {
    let outcome = run(
        ["d1", "d2", "d3"]
            .iter()
            .map(|id| page(id, LOW_CONTRAST_CSS, None))
            .collect(),
    )
    .await;

    let text = outcome.bundle.entry("color.text").unwrap();
    let original = Rgb::new(0xff, 0x6b, 0x6b);
    assert_eq!(text.status, ResolutionStatus::Canonical);
    assert_eq!(text.value, Some(ObservedValue::Color(original)));

    let finding = outcome
        .bundle
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::ContrastRisk)
        .unwrap();
    assert_eq!(
        finding.target,
        FindingTarget::Pair {
            foreground: "color.text".into(),
            background: "color.background".into()
        }
    );
    let Some(FindingPatch::Contrast {
        patched,
        original_ratio,
        patched_ratio,
        ..
    }) = &finding.patch
    else {
        panic!("expected a contrast patch");
    };
    assert!(*original_ratio < 4.5);
    assert!(*patched_ratio >= 4.5);
    assert!(contrast_ratio(*patched, Rgb::WHITE) >= 4.5);
    assert!(same_hue_family(original, *patched, 10.0));

    let adjustment = &text.adjustments[0];
    assert_eq!(adjustment.original, ObservedValue::Color(original));
    assert_eq!(adjustment.adjusted, ObservedValue::Color(*patched));
    assert_eq!(adjustment.finding_ids, vec![finding.id.clone()]);
}

// ─────────────────────── contradictions ───────────────────────

#[tokio::test]
async fn test_contradiction_holds_both_sides() {
    let outcome = run(
        ["e1", "e2", "e3"]
            .iter()
            .map(|id| page(id, CONFLICTING_BRAND_CSS, None))
            .collect(),
    )
    .await;

    // one re-aggregation; contested roles never come back as canonical
    assert_eq!(outcome.generations.len(), 2);
    let first = &outcome.generations[0];
    assert!(first.canonical("color.brand_primary").is_some());
    assert!(first.canonical("color.brand_declared").is_some());
    assert!(first.deflations.is_empty());

    let last = outcome.generations.last().unwrap();
    assert_eq!(outcome.bundle.generation, 2);
    assert!((last.deflations["color.brand_primary"] - 0.85).abs() < 1e-9);
    for sub in ["color.brand_primary", "color.brand_declared"] {
        assert!(last.contested.contains(sub));
        let entry = outcome.bundle.entry(sub).unwrap();
        assert_eq!(entry.status, ResolutionStatus::Contradicted);
        assert!(entry.value.is_none());
    }

    let contradictions: Vec<_> = outcome
        .bundle
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Contradiction)
        .collect();
    assert_eq!(contradictions.len(), 2);
    assert!(contradictions.iter().all(|f| f.severity == Severity::Critical));
    assert!(contradictions.iter().all(|f| f.generation == 1));
}

#[tokio::test]
async fn test_contradiction_with_unequal_support_has_no_winner() {
    let mut pages: Vec<_> = ["e1", "e2", "e3"]
        .iter()
        .map(|id| page(id, CONFLICTING_BRAND_CSS, None))
        .collect();
    pages.push(page(
        "e4",
        ".btn { background: #2563eb } .button { background: #2563eb } button { background-color: #2563eb }",
        None,
    ));
    let outcome = run(pages).await;

    let first = &outcome.generations[0];
    let primary = first.canonical("color.brand_primary").unwrap();
    let declared = first.canonical("color.brand_declared").unwrap();
    assert!(primary.confidence > declared.confidence);

    // the better supported side still clears the threshold once deflated
    let last = outcome.generations.last().unwrap();
    let held = last.result("color.brand_primary").unwrap();
    assert!(held.candidates[0].confidence >= outcome.bundle.threshold);

    let statuses: Vec<_> = ["color.brand_primary", "color.brand_declared"]
        .iter()
        .map(|sub| outcome.bundle.entry(sub).unwrap().status)
        .collect();
    assert_eq!(statuses, vec![ResolutionStatus::Contradicted; 2]);
    assert!(outcome
        .bundle
        .canonical_entries()
        .all(|e| !e.subcategory.starts_with("color.brand")));
}

// ─────────────────────── large text ───────────────────────

fn heading_css(heading: &str) -> String {
    format!(
        "body {{ color: #111111; background: #ffffff }} html {{ background: #ffffff }} \
         :root {{ background-color: #ffffff }} p {{ color: #111111 }} \
         h1 {{ color: {heading} }} h2 {{ color: {heading} }} h3 {{ color: {heading} }}"
    )
}

fn heading_pair() -> FindingTarget {
    FindingTarget::Pair {
        foreground: "color.heading".into(),
        background: "color.background".into(),
    }
}

#[tokio::test]
async fn test_headings_use_large_text_contrast() {
    // about 3.35:1 on white: fails body text, passes large text
    let css = heading_css("#e06666");
    let outcome = run(["g1", "g2", "g3"].iter().map(|id| page(id, &css, None)).collect()).await;

    let heading = outcome.bundle.entry("color.heading").unwrap();
    assert_eq!(heading.status, ResolutionStatus::Canonical);
    let ratio = contrast_ratio(Rgb::new(0xe0, 0x66, 0x66), Rgb::WHITE);
    assert!(ratio > 3.0 && ratio < 4.5, "{ratio}");
    assert!(outcome.bundle.findings.iter().all(|f| f.target != heading_pair()));
    assert!(heading.adjustments.is_empty());
}

#[tokio::test]
async fn test_faint_headings_are_patched_to_large_text_ratio() {
    let css = heading_css("#ff9999");
    let outcome = run(["g1", "g2", "g3"].iter().map(|id| page(id, &css, None)).collect()).await;

    let finding = outcome
        .bundle
        .findings
        .iter()
        .find(|f| f.target == heading_pair())
        .unwrap();
    assert_eq!(finding.kind, FindingKind::ContrastRisk);
    let Some(FindingPatch::Contrast {
        original_ratio,
        patched_ratio,
        required_ratio,
        ..
    }) = &finding.patch
    else {
        panic!("expected a contrast patch");
    };
    assert_eq!(*required_ratio, 3.0);
    assert!(*original_ratio < 3.0);
    assert!(*patched_ratio >= 3.0 && *patched_ratio < 4.5, "{patched_ratio}");
    assert_eq!(outcome.bundle.entry("color.heading").unwrap().adjustments.len(), 1);
}

// ─────────────────────── copying ───────────────────────

fn cta_markup(last: &str, blurb: &str) -> String {
    format!(
        r#"<html><body><main>
            <p>{blurb}</p>
            <button class="btn">Start free trial</button>
            <button class="btn">Book a demo</button>
            <button class="btn">Read the docs</button>
            <button class="btn">Contact sales</button>
            <button class="btn">View pricing</button>
            <button class="btn">{last}</button>
        </main></body></html>"#
    )
}

#[tokio::test]
async fn test_cta_sequence_from_one_page_is_a_copying_risk() {
    let ca = cta_markup(
        "Join the community",
        "Harbor keeps deploy logs searchable for every team across regions and clouds.",
    );
    let cb = cta_markup(
        "Join our community",
        "Billing exports arrive nightly as compressed files your finance tools can ingest.",
    );
    let outcome = run(vec![
        page("ca", BUTTON_CSS, Some(&ca)),
        page("cb", BUTTON_CSS, Some(&cb)),
    ])
    .await;

    let entry = outcome.bundle.entry("voice.cta_sequence").unwrap();
    assert_eq!(entry.status, ResolutionStatus::Canonical);
    let Some(ObservedValue::Sequence(labels)) = &entry.value else {
        panic!("expected a call-to-action sequence");
    };
    assert_eq!(labels.last().map(String::as_str), Some("join the community"));

    let finding = outcome
        .bundle
        .findings
        .iter()
        .find(|f| f.id == "copying_risk:voice.cta_sequence")
        .unwrap();
    assert_eq!(finding.kind, FindingKind::CopyingRisk);
    assert!(finding.remediation.contains("page ca"));
}
