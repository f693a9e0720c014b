//! Stylesheet parsing reduced to what evidence extraction needs.
//!
//! This is not a conforming CSS parser. Nested at-rules are flattened (the
//! inner rules of `@media` blocks are kept, the wrapper is dropped) and
//! values are interpreted only for the properties the extractor reads.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::Shadow;

/// Root font size used to resolve `rem`/`em`.
const ROOT_FONT_PX: f64 = 16.0;

/// Nested `var()` substitutions resolved before giving up.
const MAX_VAR_DEPTH: usize = 8;

/// A selector block with its declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selector: String,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl StyleRule {
    /// Value of a property; the last declaration wins.
    pub fn get(&self, property: &str) -> Option<&str> {
        self.declarations
            .iter()
            .rev()
            .find(|d| d.property == property)
            .map(|d| d.value.as_str())
    }

    /// Comma-separated selectors of this rule.
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.selector.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("comment regex is valid"))
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^{}]+)\{([^{}]*)\}").expect("rule regex is valid"))
}

fn pseudo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"::?[a-zA-Z-]+(\([^)]*\))?").expect("pseudo-class regex is valid")
    })
}

/// Parse a stylesheet into flat rules.
pub fn parse_stylesheet(css: &str) -> Vec<StyleRule> {
    let css = comment_re().replace_all(css, "");
    rule_re()
        .captures_iter(&css)
        .filter_map(|cap| {
            let selector = cap[1].trim();
            // A preceding at-rule prelude can bleed into the selector text.
            let selector = selector.rsplit(';').next().unwrap_or(selector).trim();
            if selector.is_empty() || selector.starts_with('@') || is_keyframe_selector(selector) {
                return None;
            }
            let declarations = parse_declarations(&cap[2]);
            if declarations.is_empty() {
                return None;
            }
            Some(StyleRule {
                selector: selector.to_string(),
                declarations,
            })
        })
        .collect()
}

fn is_keyframe_selector(selector: &str) -> bool {
    selector == "from"
        || selector == "to"
        || selector
            .split(',')
            .all(|s| s.trim().ends_with('%') && s.trim().trim_end_matches('%').parse::<f64>().is_ok())
}

/// Parse a declaration block (also used for inline `style` attributes).
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    block
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let property = prop.trim().to_ascii_lowercase();
            let value = value.trim().trim_end_matches("!important").trim();
            if property.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration {
                property,
                value: value.to_string(),
            })
        })
        .collect()
}

/// Remove pseudo-classes and pseudo-elements so the selector can be matched
/// against static markup.
pub fn strip_pseudo(selector: &str) -> String {
    pseudo_re().replace_all(selector, "").trim().to_string()
}

/// Pseudo-classes present in a selector, lowercased, without the colon.
pub fn pseudo_classes(selector: &str) -> Vec<String> {
    pseudo_re()
        .find_iter(selector)
        .map(|m| {
            m.as_str()
                .trim_start_matches(':')
                .split('(')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase()
        })
        .collect()
}

/// Element names and class names referenced by a selector, used as the
/// selector-set part of a page signature.
pub fn selector_tokens(selector: &str) -> Vec<String> {
    let stripped = strip_pseudo(selector);
    let mut tokens = Vec::new();
    for compound in stripped.split(|c: char| c.is_whitespace() || matches!(c, '>' | '+' | '~' | ',')) {
        if compound.is_empty() {
            continue;
        }
        let compound = compound.split('[').next().unwrap_or_default();
        let mut parts = compound.split('.');
        if let Some(element) = parts.next() {
            let element = element.split('#').next().unwrap_or_default();
            if !element.is_empty() && element != "*" {
                tokens.push(element.to_ascii_lowercase());
            }
        }
        for class in parts {
            let class = class.split('#').next().unwrap_or_default();
            if !class.is_empty() {
                tokens.push(format!(".{}", class.to_ascii_lowercase()));
            }
        }
    }
    tokens
}

/// Resolve a single length token to px. Percentages and viewport units have
/// no absolute value and return `None`.
pub fn parse_length_px(token: &str) -> Option<f64> {
    let t = token.trim().to_ascii_lowercase();
    if t == "0" {
        return Some(0.0);
    }
    let (num, factor) = if let Some(n) = t.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = t.strip_suffix("rem") {
        (n, ROOT_FONT_PX)
    } else if let Some(n) = t.strip_suffix("em") {
        (n, ROOT_FONT_PX)
    } else {
        return None;
    };
    num.parse::<f64>().ok().map(|v| v * factor)
}

/// All absolute lengths in a shorthand value such as `8px 16px`.
pub fn length_values_px(value: &str) -> Vec<f64> {
    value.split_whitespace().filter_map(parse_length_px).collect()
}

/// First duration in a value such as `color 200ms ease` or `.3s`.
pub fn parse_duration_ms(value: &str) -> Option<f64> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .find_map(|tok| {
            let tok = tok.trim().to_ascii_lowercase();
            if let Some(n) = tok.strip_suffix("ms") {
                n.parse::<f64>().ok()
            } else if let Some(n) = tok.strip_suffix('s') {
                n.parse::<f64>().ok().map(|v| v * 1000.0)
            } else {
                None
            }
        })
        .filter(|ms| *ms > 0.0)
}

/// Split on top-level commas, ignoring commas inside parentheses.
fn split_top_level(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
}

/// Reduce the first layer of a `box-shadow` to offsets, blur, spread, and
/// color alpha.
pub fn parse_shadow(value: &str) -> Option<Shadow> {
    let first = split_top_level(value).into_iter().next()?.trim().to_ascii_lowercase();
    if first.is_empty() || first == "none" {
        return None;
    }

    let mut alpha = 1.0;
    let mut rest = first.clone();
    if let Some(start) = first.find("rgba(").or_else(|| first.find("rgb(")) {
        if let Some(end) = first[start..].find(')') {
            let func = &first[start..start + end + 1];
            alpha = func_alpha(func).unwrap_or(1.0);
            rest = first.replace(func, " ");
        }
    }

    let lengths: Vec<f64> = rest
        .split_whitespace()
        .filter(|t| *t != "inset")
        .filter_map(parse_length_px)
        .collect();
    if lengths.len() < 2 {
        return None;
    }
    Some(Shadow {
        offset_x: lengths[0],
        offset_y: lengths[1],
        blur: lengths.get(2).copied().unwrap_or(0.0),
        spread: lengths.get(3).copied().unwrap_or(0.0),
        alpha,
    })
}

fn func_alpha(func: &str) -> Option<f64> {
    let inner = func.split_once('(')?.1.trim_end_matches(')');
    let parts: Vec<&str> = inner
        .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    let a = parts.get(3)?;
    if let Some(pct) = a.strip_suffix('%') {
        pct.parse::<f64>().ok().map(|p| p / 100.0)
    } else {
        a.parse::<f64>().ok()
    }
}

/// Custom properties (`--name`) declared anywhere, last declaration wins.
pub fn custom_properties(rules: &[StyleRule]) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for rule in rules {
        for decl in &rule.declarations {
            if decl.property.starts_with("--") {
                props.insert(decl.property.clone(), decl.value.clone());
            }
        }
    }
    props
}

/// Substitute `var(--x, fallback)` references. Unresolvable references
/// without a fallback become empty.
pub fn resolve_vars(value: &str, props: &BTreeMap<String, String>) -> String {
    let mut out = value.to_string();
    for _ in 0..MAX_VAR_DEPTH {
        let Some(start) = out.find("var(") else {
            break;
        };
        let open = start + 3;
        let mut depth = 0usize;
        let mut end = None;
        for (i, c) in out[open..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(open + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            break;
        };
        let inner = &out[open + 1..end];
        let (name, fallback) = match inner.split_once(',') {
            Some((n, f)) => (n.trim(), Some(f.trim())),
            None => (inner.trim(), None),
        };
        let replacement = props
            .get(name)
            .map(String::as_str)
            .or(fallback)
            .unwrap_or_default()
            .to_string();
        out.replace_range(start..=end, &replacement);
    }
    out.trim().to_string()
}

/// First concrete family of a `font-family` list, lowercased and unquoted.
pub fn primary_font_family(value: &str) -> Option<String> {
    split_top_level(value)
        .into_iter()
        .map(|f| f.trim().trim_matches(|c: char| c == '"' || c == '\'').trim().to_ascii_lowercase())
        .find(|f| !f.is_empty() && !f.starts_with("var(") && f != "inherit" && f != "initial")
}
