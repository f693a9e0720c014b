//! Structural page signatures used for template clustering.

use std::collections::BTreeSet;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::css::{selector_tokens, StyleRule};

/// Deepest body-relative level recorded in the DOM shape.
const MAX_SHAPE_DEPTH: usize = 6;

/// Cap on DOM shape tokens per page.
const MAX_SHAPE_TOKENS: usize = 400;

/// Number of layout geometry features.
pub const GEOMETRY_DIM: usize = 8;

/// Normalized structural features of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralSignature {
    /// Pre-order `depth:tag` tokens under `<body>`.
    pub dom_shape: Vec<String>,
    /// Element and class tokens referenced by markup and style rules.
    pub selectors: BTreeSet<String>,
    /// Layout geometry features, each in [0, 1].
    pub geometry: Vec<f64>,
}

impl StructuralSignature {
    /// Build a signature from whatever parts of the capture exist.
    pub fn build(
        document: Option<&Html>,
        rules: &[StyleRule],
        screenshot_dims: Option<(u32, u32)>,
    ) -> Self {
        let mut selectors: BTreeSet<String> = rules
            .iter()
            .flat_map(|r| r.selectors().flat_map(selector_tokens).collect::<Vec<_>>())
            .collect();

        let mut dom_shape = Vec::new();
        let mut counts = ElementCounts::default();

        if let Some(doc) = document {
            if let Some(body) = body_of(doc) {
                walk(body, 0, &mut dom_shape, &mut selectors, &mut counts);
                counts.words = body.text().map(|t| t.split_whitespace().count()).sum();
            }
        }

        let aspect = screenshot_dims
            .filter(|(w, _)| *w > 0)
            .map(|(w, h)| {
                let ratio = h as f64 / w as f64;
                ratio / (ratio + 2.0)
            })
            .unwrap_or(0.5);

        let geometry = vec![
            aspect,
            saturate(counts.sections, 8.0),
            saturate(counts.headings, 10.0),
            saturate(counts.images, 10.0),
            saturate(counts.links, 40.0),
            saturate(counts.form_controls, 6.0),
            saturate(counts.tables, 2.0),
            saturate(counts.words, 500.0),
        ];

        Self {
            dom_shape,
            selectors,
            geometry,
        }
    }
}

#[derive(Default)]
struct ElementCounts {
    sections: usize,
    headings: usize,
    images: usize,
    links: usize,
    form_controls: usize,
    tables: usize,
    words: usize,
}

fn saturate(count: usize, half: f64) -> f64 {
    let c = count as f64;
    c / (c + half)
}

fn body_of(doc: &Html) -> Option<ElementRef<'_>> {
    let sel = Selector::parse("body").ok()?;
    doc.select(&sel).next()
}

fn walk(
    el: ElementRef<'_>,
    depth: usize,
    shape: &mut Vec<String>,
    selectors: &mut BTreeSet<String>,
    counts: &mut ElementCounts,
) {
    let name = el.value().name();
    if matches!(name, "script" | "style" | "noscript" | "template") {
        return;
    }

    match name {
        "section" | "article" | "header" | "footer" | "nav" | "main" | "aside" => {
            counts.sections += 1
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => counts.headings += 1,
        "img" | "picture" | "svg" | "video" => counts.images += 1,
        "a" => counts.links += 1,
        "input" | "select" | "textarea" | "form" => counts.form_controls += 1,
        "table" => counts.tables += 1,
        _ => {}
    }
    for class in el.value().classes() {
        selectors.insert(format!(".{}", class.to_ascii_lowercase()));
    }

    if depth > 0 && depth <= MAX_SHAPE_DEPTH && shape.len() < MAX_SHAPE_TOKENS {
        shape.push(format!("{depth}:{name}"));
    }
    for child in el.children().filter_map(ElementRef::wrap) {
        walk(child, depth + 1, shape, selectors, counts);
    }
}
