//! Evidence extraction.
//!
//! Extraction runs in two phases. [`analyze`] does the per-page parsing work
//! and needs nothing but the page's own capture, so it runs inside the
//! bounded page stage. [`observe`] turns the resulting signals into typed
//! observations once the page's quality weight is known.

pub mod component;
pub mod verbal;
pub mod visual;

use image::GenericImageView;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::capture::{decode_screenshot, PageCapture, PageContent, WARN_JS_INCOMPLETE, WARN_TIMEOUT};
use crate::css::{parse_stylesheet, StyleRule};
use crate::signature::StructuralSignature;
use crate::types::{
    Category, EvidenceObservation, ObservationId, ObservedValue, Page, PageId, PageStatus,
};
use crate::weight::QualitySignals;

/// Partial pages with fewer style rules than this are flagged.
const MIN_STYLE_RULES: usize = 3;

/// What a raw confidence is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", content = "count", rename_all = "snake_case")]
pub enum ConfidenceBasis {
    /// Independent DOM nodes (or rules) exhibiting the value.
    Nodes(u32),
    /// Words of text the signal was measured over.
    Words(usize),
    /// Calls to action the signal was measured over.
    Ctas(usize),
}

impl ConfidenceBasis {
    /// Repetition strength in [0, 1) before quality weighting.
    pub fn strength(&self) -> f64 {
        match *self {
            Self::Nodes(n) => 1.0 - (-(n as f64) / 2.0).exp(),
            Self::Words(w) => 1.0 - (-(w as f64) / 200.0).exp(),
            Self::Ctas(c) => 1.0 - (-(c as f64) / 3.0).exp(),
        }
    }

    pub fn occurrences(&self) -> u32 {
        match *self {
            Self::Nodes(n) => n,
            Self::Words(w) => u32::try_from(w).unwrap_or(u32::MAX),
            Self::Ctas(c) => u32::try_from(c).unwrap_or(u32::MAX),
        }
    }
}

/// A value seen on a page before it is weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub category: Category,
    pub subcategory: String,
    pub value: ObservedValue,
    pub basis: ConfidenceBasis,
}

impl RawSignal {
    pub fn new(
        category: Category,
        subcategory: impl Into<String>,
        value: ObservedValue,
        basis: ConfidenceBasis,
    ) -> Self {
        Self {
            category,
            subcategory: subcategory.into(),
            value,
            basis,
        }
    }
}

/// Everything learned from one page's capture.
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub page: Page,
    pub signals: Vec<RawSignal>,
    pub quality: QualitySignals,
    /// Capture parts that could not be observed.
    pub unobservable: Vec<String>,
}

/// Typed observations for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    pub page_id: PageId,
    pub observations: Vec<EvidenceObservation>,
    pub unobservable: Vec<String>,
}

/// Parsed capture parts shared by the sub-extractors.
pub struct ParsedPage<'a> {
    pub document: Option<&'a Html>,
    pub rules: &'a [StyleRule],
    pub text: Option<&'a str>,
}

/// Analyze one page. Never fails: whatever cannot be observed is recorded
/// in `unobservable` and the remaining signals are still produced.
pub fn analyze(content: &PageContent) -> PageAnalysis {
    let capture = &content.capture;
    let mut unobservable: Vec<String> = content.load_gaps.clone();

    let document = content.markup.as_deref().map(Html::parse_document);
    if document.is_none() && !unobservable.iter().any(|g| g == "markup") {
        unobservable.push("markup".to_string());
    }

    let mut css = content.styles.clone().unwrap_or_default();
    if let Some(doc) = &document {
        if let Ok(sel) = Selector::parse("style") {
            for el in doc.select(&sel) {
                css.push('\n');
                css.extend(el.text());
            }
        }
    }
    let rules = parse_stylesheet(&css);
    if rules.is_empty() && !unobservable.iter().any(|g| g == "styles") {
        unobservable.push("styles".to_string());
    }

    let screenshot = match &content.screenshot {
        Some(data) => match decode_screenshot(data) {
            Ok(img) => Some(img),
            Err(e) => {
                tracing::warn!("Unreadable screenshot for {}: {e}", capture.id);
                unobservable.push("screenshot".to_string());
                None
            }
        },
        None => {
            if !unobservable.iter().any(|g| g == "screenshot") {
                unobservable.push("screenshot".to_string());
            }
            None
        }
    };

    let text = content.text.clone().or_else(|| {
        document
            .as_ref()
            .map(verbal::visible_text)
            .filter(|t| !t.trim().is_empty())
    });
    if text.is_none() && !unobservable.iter().any(|g| g == "text") {
        unobservable.push("text".to_string());
    }

    let parsed = ParsedPage {
        document: document.as_ref(),
        rules: &rules,
        text: text.as_deref(),
    };

    let mut signals = visual::extract(&parsed);
    if let Some(img) = &screenshot {
        signals.extend(visual::surface_color(img));
    }
    let voice = verbal::extract(&parsed);
    signals.extend(voice.signals);
    let components = component::extract(&parsed);
    signals.extend(components.signals);

    let render_incomplete = capture.has_warning(WARN_TIMEOUT) || capture.has_warning(WARN_JS_INCOMPLETE);
    for tag in [WARN_TIMEOUT, WARN_JS_INCOMPLETE] {
        if capture.has_warning(tag) {
            unobservable.push(tag.to_string());
        }
    }

    let status = match capture.status {
        PageStatus::Excluded => PageStatus::Excluded,
        _ if render_incomplete || !content.load_gaps.is_empty() => PageStatus::Partial,
        other => other,
    };
    let insufficient_style = status == PageStatus::Partial && rules.len() < MIN_STYLE_RULES;

    let signature = StructuralSignature::build(
        document.as_ref(),
        &rules,
        screenshot.as_ref().map(|img| img.dimensions()),
    );

    let distinct_rules = if rules.is_empty() && content.styles.is_none() {
        None
    } else {
        let mut seen: Vec<&str> = rules.iter().map(|r| r.selector.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        Some(seen.len())
    };
    let third_party_noise = if capture.assets.is_empty() && document.is_none() {
        None
    } else {
        Some(capture.third_party_noise())
    };

    tracing::debug!(
        "Analyzed {}: {} signals, {} rules, unobservable {:?}",
        capture.id,
        signals.len(),
        rules.len(),
        unobservable
    );

    PageAnalysis {
        page: page_record(capture, status, signature, insufficient_style),
        signals,
        quality: QualitySignals {
            distinct_rules,
            has_hero: components.has_hero,
            third_party_noise,
            shingles: voice.shingles,
            render_incomplete,
        },
        unobservable,
    }
}

/// Analysis for a page whose content never arrived (timeout or load
/// failure). The page stays in the run as `partial` with no signals.
pub fn analyze_unavailable(capture: &PageCapture, gap: &str) -> PageAnalysis {
    let status = if capture.status == PageStatus::Excluded {
        PageStatus::Excluded
    } else {
        PageStatus::Partial
    };
    PageAnalysis {
        page: page_record(capture, status, StructuralSignature::build(None, &[], None), true),
        signals: Vec::new(),
        quality: QualitySignals {
            render_incomplete: true,
            ..QualitySignals::default()
        },
        unobservable: vec![gap.to_string()],
    }
}

fn page_record(
    capture: &PageCapture,
    status: PageStatus,
    signature: StructuralSignature,
    insufficient_style: bool,
) -> Page {
    Page {
        id: capture.id.clone(),
        url: capture.url.clone(),
        cluster_hint: capture.cluster_hint.clone(),
        status,
        signature,
        insufficient_style,
    }
}

/// Turn a page's signals into observations with raw confidence
/// `strength × quality_weight`, halved for flagged pages.
pub fn observe(analysis: &PageAnalysis, quality_weight: f64) -> PageExtraction {
    let page = &analysis.page;
    let low_confidence = page.insufficient_style;
    let observations = analysis
        .signals
        .iter()
        .enumerate()
        .map(|(seq, signal)| {
            let mut raw = signal.basis.strength() * quality_weight.clamp(0.0, 1.0);
            if low_confidence {
                raw *= 0.5;
            }
            EvidenceObservation {
                id: ObservationId::new(&page.id, seq),
                category: signal.category,
                subcategory: signal.subcategory.clone(),
                value: signal.value.clone(),
                page_id: page.id.clone(),
                raw_confidence: raw.clamp(0.0, 1.0),
                occurrences: signal.basis.occurrences(),
                low_confidence,
            }
        })
        .collect();

    PageExtraction {
        page_id: page.id.clone(),
        observations,
        unobservable: analysis.unobservable.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureManifest;

    fn content(markup: Option<&str>, styles: Option<&str>, warnings: &[&str]) -> PageContent {
        let manifest = CaptureManifest::from_json_str(
            r#"{"source_url": "https://acme.test", "pages": [{"id": "p1", "url": "https://acme.test/"}]}"#,
        )
        .unwrap();
        let mut capture = manifest.pages[0].clone();
        capture.warnings = warnings.iter().map(|w| w.to_string()).collect();
        PageContent {
            capture,
            markup: markup.map(String::from),
            styles: styles.map(String::from),
            text: None,
            screenshot: None,
            load_gaps: Vec::new(),
        }
    }

    #[test]
    fn test_confidence_basis_strength() {
        assert_eq!(ConfidenceBasis::Nodes(0).strength(), 0.0);
        assert!((ConfidenceBasis::Nodes(2).strength() - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
        assert!(ConfidenceBasis::Nodes(10).strength() > ConfidenceBasis::Nodes(3).strength());
        assert!(ConfidenceBasis::Words(1000).strength() > 0.99);
    }

    #[test]
    fn test_missing_parts_are_recorded_not_fatal() {
        let analysis = analyze(&content(None, Some("body { color: #111111 }"), &[]));
        assert!(analysis.unobservable.contains(&"markup".to_string()));
        assert!(analysis.unobservable.contains(&"screenshot".to_string()));
        assert!(analysis.unobservable.contains(&"text".to_string()));
        assert!(analysis
            .signals
            .iter()
            .any(|s| s.subcategory == "color.text"));
    }

    #[test]
    fn test_partial_page_with_few_rules_is_flagged() {
        let analysis = analyze(&content(
            Some("<html><body><p>Hi</p></body></html>"),
            Some("body { color: #111111 }"),
            &["timeout"],
        ));
        assert_eq!(analysis.page.status, PageStatus::Partial);
        assert!(analysis.page.insufficient_style);

        let extraction = observe(&analysis, 0.8);
        assert!(!extraction.observations.is_empty());
        assert!(extraction.observations.iter().all(|o| o.low_confidence));
        let text = extraction
            .observations
            .iter()
            .find(|o| o.subcategory == "color.text")
            .unwrap();
        let expected = ConfidenceBasis::Nodes(1).strength() * 0.8 * 0.5;
        assert!((text.raw_confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_page_is_partial() {
        let c = content(None, None, &[]);
        let analysis = analyze_unavailable(&c.capture, "timeout");
        assert_eq!(analysis.page.status, PageStatus::Partial);
        assert!(analysis.signals.is_empty());
        assert_eq!(analysis.unobservable, vec!["timeout".to_string()]);
    }

    #[test]
    fn test_observation_ids_are_unique_per_page() {
        let analysis = analyze(&content(
            Some("<html><body><a href='/'>x</a></body></html>"),
            Some("body { color: #111111; background: #ffffff } a { color: #2563eb }"),
            &[],
        ));
        let extraction = observe(&analysis, 1.0);
        let mut ids: Vec<_> = extraction.observations.iter().map(|o| o.id.clone()).collect();
        let n = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), n);
    }
}
