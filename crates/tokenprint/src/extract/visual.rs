//! Visual token signals from style rules, markup, and screenshots.

use std::collections::BTreeMap;

use image::DynamicImage;
use scraper::{Html, Selector};

use super::{ConfidenceBasis, ParsedPage, RawSignal};
use crate::color::{parse_color, Rgb};
use crate::css::{
    custom_properties, length_values_px, parse_duration_ms, parse_length_px, parse_shadow,
    primary_font_family, resolve_vars, strip_pseudo,
};
use crate::types::{Category, Dimension, ObservedValue};

/// Longest scale kept per page.
const MAX_SCALE_STEPS: usize = 8;
/// Fewest distinct steps that make a scale.
const MIN_SCALE_STEPS: usize = 3;
/// Spacing values above this are layout, not rhythm.
const MAX_SPACING_PX: f64 = 128.0;
/// Radii at or above this are pills, not the base radius.
const PILL_RADIUS_PX: f64 = 999.0;
/// Narrowest max-width treated as a container width.
const MIN_CONTAINER_PX: f64 = 480.0;
/// Screenshot downsample edge for dominant-color sampling.
const SAMPLE_EDGE: u32 = 32;

const SPACING_PROPERTIES: [&str; 13] = [
    "margin",
    "margin-top",
    "margin-bottom",
    "margin-left",
    "margin-right",
    "padding",
    "padding-top",
    "padding-bottom",
    "padding-left",
    "padding-right",
    "gap",
    "row-gap",
    "column-gap",
];

/// Role a selector plays for token purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Root,
    Text,
    Heading,
    Link,
    Button,
    Container,
    Other,
}

fn classify(selector: &str) -> Target {
    let raw = selector.trim().to_ascii_lowercase();
    if raw == ":root" || raw == "html" || raw == "body" {
        return Target::Root;
    }
    if raw.contains("[type=submit]") || raw.contains("[type=\"submit\"]") {
        return Target::Button;
    }
    let stripped = strip_pseudo(&raw);
    let last = stripped
        .split(|c: char| c.is_whitespace() || matches!(c, '>' | '+' | '~'))
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or_default();
    let last = last.split('[').next().unwrap_or_default();
    let mut parts = last.split('.');
    let element = parts.next().unwrap_or_default().split('#').next().unwrap_or_default();
    let classes: Vec<&str> = parts.collect();
    let class_has = |words: &[&str]| classes.iter().any(|c| words.iter().any(|w| c.contains(w)));

    if element == "button" || class_has(&["btn", "button", "cta"]) {
        Target::Button
    } else if matches!(element, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") || class_has(&["heading", "title"]) {
        Target::Heading
    } else if element == "a" || class_has(&["link"]) {
        Target::Link
    } else if class_has(&["container", "wrapper", "content"]) {
        Target::Container
    } else if matches!(element, "p" | "main" | "article" | "li") {
        Target::Text
    } else {
        Target::Other
    }
}

/// Per-page tally of distinct values per subcategory.
#[derive(Default)]
struct Tally {
    entries: BTreeMap<(String, String), (ObservedValue, u32)>,
}

impl Tally {
    fn add(&mut self, subcategory: &str, value: ObservedValue, nodes: u32) {
        let key = (subcategory.to_string(), value_key(&value));
        self.entries
            .entry(key)
            .and_modify(|(_, n)| *n += nodes)
            .or_insert((value, nodes));
    }

    fn into_signals(self) -> Vec<RawSignal> {
        self.entries
            .into_iter()
            .map(|((sub, _), (value, n))| {
                let category = if sub.starts_with("layout.") {
                    Category::Layout
                } else {
                    Category::Visual
                };
                RawSignal::new(category, sub, value, ConfidenceBasis::Nodes(n))
            })
            .collect()
    }
}

fn value_key(value: &ObservedValue) -> String {
    match value {
        ObservedValue::Text(t) => t.to_ascii_lowercase(),
        other => other.describe(),
    }
}

/// Matches per selector, memoized. Falls back to one node (the rule itself)
/// when there is no markup or nothing matches.
struct NodeCounter<'a> {
    document: Option<&'a Html>,
    cache: BTreeMap<String, u32>,
}

impl<'a> NodeCounter<'a> {
    fn new(document: Option<&'a Html>) -> Self {
        Self {
            document,
            cache: BTreeMap::new(),
        }
    }

    fn count(&mut self, selector: &str) -> u32 {
        if let Some(n) = self.cache.get(selector) {
            return *n;
        }
        let stripped = strip_pseudo(selector);
        let n = match (self.document, Selector::parse(&stripped)) {
            (Some(doc), Ok(sel)) if !stripped.is_empty() => {
                u32::try_from(doc.select(&sel).count()).unwrap_or(u32::MAX).max(1)
            }
            _ => 1,
        };
        self.cache.insert(selector.to_string(), n);
        n
    }
}

/// Collects scale steps with their frequency.
#[derive(Default)]
struct ScaleBuilder {
    counts: BTreeMap<i64, u32>,
    declarations: u32,
}

impl ScaleBuilder {
    fn add(&mut self, px: f64) {
        // half-pixel buckets
        let key = (px * 2.0).round() as i64;
        *self.counts.entry(key).or_default() += 1;
    }

    fn build(self) -> Option<(Vec<f64>, u32)> {
        if self.counts.len() < MIN_SCALE_STEPS {
            return None;
        }
        let mut by_freq: Vec<(i64, u32)> = self.counts.into_iter().collect();
        by_freq.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        by_freq.truncate(MAX_SCALE_STEPS);
        let mut steps: Vec<f64> = by_freq.into_iter().map(|(k, _)| k as f64 / 2.0).collect();
        steps.sort_by(|a, b| a.total_cmp(b));
        Some((steps, self.declarations))
    }
}

fn color_in(value: &str) -> Option<Rgb> {
    parse_color(value).or_else(|| value.split_whitespace().find_map(parse_color))
}

/// Extract visual and layout signals from style rules and markup.
pub fn extract(page: &ParsedPage<'_>) -> Vec<RawSignal> {
    let props = custom_properties(page.rules);
    let mut counter = NodeCounter::new(page.document);
    let mut tally = Tally::default();
    let mut spacing = ScaleBuilder::default();
    let mut type_scale = ScaleBuilder::default();

    for rule in page.rules {
        for selector in rule.selectors() {
            let target = classify(selector);
            let nodes = counter.count(selector);

            for decl in &rule.declarations {
                if decl.property.starts_with("--") {
                    continue;
                }
                let value = resolve_vars(&decl.value, &props);
                if value.is_empty() {
                    continue;
                }
                observe_declaration(
                    &decl.property,
                    &value,
                    target,
                    nodes,
                    &mut tally,
                    &mut spacing,
                    &mut type_scale,
                );
            }
        }
    }

    for (name, raw) in &props {
        let value = resolve_vars(raw, &props);
        if is_brand_property(name) {
            if let Some(color) = parse_color(&value) {
                tally.add("color.brand_declared", ObservedValue::Color(color), 1);
            }
        } else if is_body_font_property(name) {
            if let Some(family) = primary_font_family(&value) {
                tally.add("typography.font_family.declared", ObservedValue::Text(family), 1);
            }
        }
    }

    if let Some(doc) = page.document {
        if let Ok(sel) = Selector::parse(r#"meta[name="theme-color"]"#) {
            for meta in doc.select(&sel) {
                if let Some(color) = meta.value().attr("content").and_then(parse_color) {
                    tally.add("color.brand_declared", ObservedValue::Color(color), 1);
                }
            }
        }
    }

    let mut signals = tally.into_signals();
    if let Some((steps, n)) = spacing.build() {
        signals.push(RawSignal::new(
            Category::Visual,
            "spacing.scale",
            ObservedValue::Scale(steps),
            ConfidenceBasis::Nodes(n),
        ));
    }
    if let Some((steps, n)) = type_scale.build() {
        signals.push(RawSignal::new(
            Category::Visual,
            "typography.scale",
            ObservedValue::Scale(steps),
            ConfidenceBasis::Nodes(n),
        ));
    }
    signals
}

fn is_brand_property(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    (n.contains("primary") || n.contains("brand"))
        && !["text", "bg", "background", "surface", "border", "font"]
            .iter()
            .any(|w| n.contains(w))
}

fn is_body_font_property(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    n.contains("font")
        && ["body", "sans", "base", "family", "text"].iter().any(|w| n.contains(w))
        && !n.contains("heading")
        && !n.contains("size")
        && !n.contains("weight")
}

fn observe_declaration(
    property: &str,
    value: &str,
    target: Target,
    nodes: u32,
    tally: &mut Tally,
    spacing: &mut ScaleBuilder,
    type_scale: &mut ScaleBuilder,
) {
    match property {
        "color" => {
            let sub = match target {
                Target::Button => "color.on_brand",
                Target::Heading => "color.heading",
                Target::Link => "color.link",
                Target::Root | Target::Text => "color.text",
                _ => return,
            };
            if let Some(c) = parse_color(value) {
                tally.add(sub, ObservedValue::Color(c), nodes);
            }
        }
        "background" | "background-color" => {
            let sub = match target {
                Target::Button => "color.brand_primary",
                Target::Root => "color.background",
                _ => return,
            };
            if let Some(c) = color_in(value) {
                tally.add(sub, ObservedValue::Color(c), nodes);
            }
        }
        "border-color" => {
            if let Some(c) = color_in(value) {
                tally.add("color.border", ObservedValue::Color(c), nodes);
            }
        }
        "border" | "border-top" | "border-bottom" | "border-left" | "border-right" => {
            if let Some(c) = color_in(value) {
                tally.add("color.border", ObservedValue::Color(c), nodes);
            }
            if let Some(w) = length_values_px(value).into_iter().find(|w| *w > 0.0) {
                tally.add("border.width", ObservedValue::Dimension(Dimension::px(w)), nodes);
            }
        }
        "border-width" => {
            if let Some(w) = length_values_px(value).into_iter().find(|w| *w > 0.0) {
                tally.add("border.width", ObservedValue::Dimension(Dimension::px(w)), nodes);
            }
        }
        "font-family" => {
            let sub = match target {
                Target::Root | Target::Text => "typography.font_family.body",
                Target::Heading => "typography.font_family.heading",
                _ => return,
            };
            if let Some(family) = primary_font_family(value) {
                tally.add(sub, ObservedValue::Text(family), nodes);
            }
        }
        "font-size" => {
            if let Some(px) = parse_length_px(value) {
                type_scale.add(px);
                type_scale.declarations += 1;
            }
        }
        "border-radius" => {
            if let Some(r) = length_values_px(value).first().copied() {
                if r > 0.0 && r < PILL_RADIUS_PX {
                    tally.add("radius.base", ObservedValue::Dimension(Dimension::px(r)), nodes);
                }
            }
        }
        "box-shadow" => {
            if let Some(shadow) = parse_shadow(value) {
                tally.add("shadow.elevation", ObservedValue::Shadow(shadow), nodes);
            }
        }
        "transition" | "transition-duration" | "animation-duration" => {
            if let Some(ms) = parse_duration_ms(value) {
                tally.add("motion.duration", ObservedValue::Dimension(Dimension::ms(ms)), nodes);
            }
        }
        "max-width" if target == Target::Container => {
            if let Some(px) = parse_length_px(value).filter(|px| *px >= MIN_CONTAINER_PX) {
                tally.add(
                    "layout.container_width",
                    ObservedValue::Dimension(Dimension::px(px)),
                    nodes,
                );
            }
        }
        p if SPACING_PROPERTIES.contains(&p) => {
            let mut any = false;
            for px in length_values_px(value) {
                if px > 0.0 && px <= MAX_SPACING_PX {
                    spacing.add(px);
                    any = true;
                }
            }
            if any {
                spacing.declarations += 1;
            }
        }
        _ => {}
    }
}

/// Dominant color of the rendered page, sampled from a downscaled
/// screenshot.
pub fn surface_color(img: &DynamicImage) -> Option<RawSignal> {
    let sample = img.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE).to_rgb8();
    let total = (sample.width() * sample.height()) as usize;
    if total == 0 {
        return None;
    }

    let mut buckets: BTreeMap<(u8, u8, u8), (u32, [u64; 3])> = BTreeMap::new();
    for px in sample.pixels() {
        let [r, g, b] = px.0;
        let entry = buckets.entry((r >> 4, g >> 4, b >> 4)).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += r as u64;
        entry.1[1] += g as u64;
        entry.1[2] += b as u64;
    }

    let mut best: Option<(u32, [u64; 3])> = None;
    for (_, (count, sums)) in buckets {
        if best.map(|(c, _)| count > c).unwrap_or(true) {
            best = Some((count, sums));
        }
    }
    let (count, sums) = best?;
    let avg = |s: u64| (s / count as u64) as u8;
    let color = Rgb::new(avg(sums[0]), avg(sums[1]), avg(sums[2]));
    let share = count as f64 / total as f64;
    let nodes = ((share * 10.0).round() as u32).max(1);

    Some(RawSignal::new(
        Category::Visual,
        "color.surface",
        ObservedValue::Color(color),
        ConfidenceBasis::Nodes(nodes),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::parse_stylesheet;

    fn signals_for(markup: &str, css: &str) -> Vec<RawSignal> {
        let doc = Html::parse_document(markup);
        let rules = parse_stylesheet(css);
        extract(&ParsedPage {
            document: Some(&doc),
            rules: &rules,
            text: None,
        })
    }

    fn find<'a>(signals: &'a [RawSignal], sub: &str) -> Vec<&'a RawSignal> {
        signals.iter().filter(|s| s.subcategory == sub).collect()
    }

    #[test]
    fn test_classify_selectors() {
        assert_eq!(classify(":root"), Target::Root);
        assert_eq!(classify(".hero .btn-primary:hover"), Target::Button);
        assert_eq!(classify("article h2"), Target::Heading);
        assert_eq!(classify("nav a"), Target::Link);
        assert_eq!(classify(".container"), Target::Container);
        assert_eq!(classify("input[type=submit]"), Target::Button);
    }

    #[test]
    fn test_colors_and_brand() {
        let signals = signals_for(
            r##"<html><head><meta name="theme-color" content="#2563eb"></head>
               <body><p>a</p><p>b</p><button class="btn">Go</button></body></html>"##,
            ":root { --brand-primary: #2563eb }
             body { color: #111827; background: #ffffff }
             p { color: #111827 }
             .btn { background: var(--brand-primary); color: #fff }",
        );
        let text = find(&signals, "color.text");
        assert_eq!(text.len(), 1);
        // body (1 node) + p (2 nodes)
        assert_eq!(text[0].basis, ConfidenceBasis::Nodes(3));
        assert_eq!(
            find(&signals, "color.brand_primary")[0].value,
            ObservedValue::Color(Rgb::new(0x25, 0x63, 0xeb))
        );
        assert_eq!(find(&signals, "color.on_brand")[0].value, ObservedValue::Color(Rgb::WHITE));
        // custom property + theme-color merge into one tally entry
        let declared = find(&signals, "color.brand_declared");
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].basis, ConfidenceBasis::Nodes(2));
    }

    #[test]
    fn test_spacing_scale() {
        let signals = signals_for(
            "<html><body></body></html>",
            ".a { padding: 8px 16px } .b { margin: 24px } .c { gap: 32px } .d { margin: 0 auto }",
        );
        let scale = find(&signals, "spacing.scale");
        assert_eq!(scale[0].value, ObservedValue::Scale(vec![8.0, 16.0, 24.0, 32.0]));
        assert_eq!(scale[0].basis, ConfidenceBasis::Nodes(3));
    }

    #[test]
    fn test_short_scale_is_not_emitted() {
        let signals = signals_for("<html><body></body></html>", ".a { padding: 8px 16px }");
        assert!(find(&signals, "spacing.scale").is_empty());
    }

    #[test]
    fn test_radius_shadow_motion_layout() {
        let signals = signals_for(
            r#"<html><body><div class="card"></div><div class="card"></div></body></html>"#,
            ".card { border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,.2); transition: all 150ms ease }
             .pill { border-radius: 9999px }
             .container { max-width: 1200px }
             .card { border: 1px solid #e5e7eb }",
        );
        let radius = find(&signals, "radius.base");
        assert_eq!(radius.len(), 1);
        assert_eq!(radius[0].basis, ConfidenceBasis::Nodes(2));
        assert_eq!(find(&signals, "shadow.elevation").len(), 1);
        assert_eq!(
            find(&signals, "motion.duration")[0].value,
            ObservedValue::Dimension(Dimension::ms(150.0))
        );
        let layout = find(&signals, "layout.container_width");
        assert_eq!(layout[0].category, Category::Layout);
        assert_eq!(find(&signals, "border.width").len(), 1);
        assert_eq!(find(&signals, "color.border").len(), 1);
    }

    #[test]
    fn test_surface_color_from_screenshot() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            64,
            image::Rgb([250, 250, 250]),
        ));
        let signal = surface_color(&img).unwrap();
        assert_eq!(signal.value, ObservedValue::Color(Rgb::new(250, 250, 250)));
        assert_eq!(signal.basis, ConfidenceBasis::Nodes(10));
    }
}
