//! Run-plan preview: the markdown a reviewer signs off before crawling.

use std::fmt::{self, Write};

use serde_json::Value;

use crate::intake::{IntakeConfig, MODE};
use crate::types::{CanonError, CanonResult};

const DEFAULT_ARTIFACTS: [&str; 7] = [
    "reports/*",
    "tokens/tokens.json",
    "tokens/tokens.css",
    "tokens/tailwind.theme.js",
    "components/*",
    "patterns/*",
    "evidence/*",
];

/// Rough crawl cost bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Fast,
    Medium,
    Heavy,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        })
    }
}

/// Classify the crawl by page count, screenshot viewports, and mode.
pub fn workload_class(intake: &IntakeConfig, url_count: usize) -> Workload {
    let max_pages = intake.scope.max_pages.unwrap_or(url_count as u64) as usize;
    let mut score = max_pages.max(url_count);
    if intake.capture.screenshots.enabled() >= 2 {
        score += 5;
    }
    if intake.scope.crawl_mode.as_deref() == Some("bounded_full") {
        score += 5;
    }
    match score {
        0..=15 => Workload::Fast,
        16..=50 => Workload::Medium,
        _ => Workload::Heavy,
    }
}

/// Accept a URL list as a JSON array, `{"urls": [...]}`, or
/// `{"pages": [{"url": ...}]}`.
pub fn parse_url_list(value: &Value) -> CanonResult<Vec<String>> {
    let as_strings = |items: &[Value]| {
        items
            .iter()
            .map(|u| match u {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
    };
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(as_strings(items)),
        Value::Object(obj) => {
            if let Some(Value::Array(urls)) = obj.get("urls") {
                return Ok(as_strings(urls));
            }
            if let Some(Value::Array(pages)) = obj.get("pages") {
                return Ok(pages
                    .iter()
                    .filter_map(|p| p.get("url").and_then(Value::as_str))
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect());
            }
            Err(CanonError::InvalidInput(
                "URL input must be a list or an object with 'urls' or 'pages'".into(),
            ))
        }
        _ => Err(CanonError::InvalidInput(
            "URL input must be a list or an object with 'urls' or 'pages'".into(),
        )),
    }
}

fn plan_warnings(intake: &IntakeConfig, urls: &[String]) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if intake.scope.respect_robots_txt == Some(false) {
        warnings.push("robots.txt respect is disabled; confirm policy allows this.");
    }
    if intake.capture.css == Some(false) {
        warnings.push("CSS capture disabled; visual token confidence may degrade.");
    }
    if intake.capture.text == Some(false) {
        warnings.push("Text capture disabled; voice extraction may degrade.");
    }
    if intake.capture.screenshots.desktop != Some(true) {
        warnings.push("Desktop screenshots disabled; this departs from the recommended profile.");
    }
    if urls.is_empty() {
        warnings.push("No URLs selected yet; crawl plan is incomplete.");
    }
    warnings
}

fn or_na<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

/// Render the run plan as markdown.
pub fn render_run_plan(intake: &IntakeConfig, urls: &[String]) -> String {
    // Writing to a String cannot fail.
    let mut out = String::new();
    let _ = write_plan(&mut out, intake, urls);
    out
}

fn write_plan(out: &mut String, intake: &IntakeConfig, urls: &[String]) -> fmt::Result {
    let project = &intake.project;
    let scope = &intake.scope;
    let capture = &intake.capture;
    let quality = &intake.quality;

    let limit = match scope.max_pages {
        Some(n) if n > 0 => (n as usize).min(urls.len()),
        _ => urls.len(),
    };
    let selected = &urls[..limit];

    writeln!(out, "# Run Plan Preview: {}", project.name.as_deref().unwrap_or("Untitled Project"))?;
    writeln!(out)?;
    writeln!(out, "## Project Intent")?;
    writeln!(out, "- Mode: `{}`", intake.mode.as_deref().unwrap_or(MODE))?;
    writeln!(out, "- Source URL: `{}`", project.source_url.as_deref().unwrap_or(""))?;
    writeln!(out, "- Audience: `{}`", project.output_audience.as_deref().unwrap_or("both"))?;
    writeln!(out, "- Intended use: `{}`", project.intended_use.as_deref().unwrap_or("rebuild_baseline"))?;
    writeln!(out, "- Warning: Outputs are brand-faithful, normalized, and non-clone.")?;
    writeln!(out)?;

    writeln!(out, "## Crawl Scope")?;
    writeln!(out, "- Crawl mode: `{}`", scope.crawl_mode.as_deref().unwrap_or("representative_sample"))?;
    writeln!(out, "- Max pages: `{}`", or_na(scope.max_pages))?;
    writeln!(out, "- Max depth: `{}`", or_na(scope.max_depth))?;
    writeln!(out, "- Include subdomains: `{}`", scope.include_subdomains.unwrap_or(false))?;
    writeln!(out, "- Respect robots.txt: `{}`", scope.respect_robots_txt.unwrap_or(true))?;
    writeln!(out, "- Crawl delay (ms): `{}`", or_na(scope.crawl_delay_ms))?;
    writeln!(out, "- Requests/sec: `{}`", or_na(scope.requests_per_second))?;
    writeln!(out)?;

    writeln!(out, "## Included / Excluded Paths")?;
    if scope.exclude_paths.is_empty() {
        writeln!(out, "- No explicit excluded paths configured")?;
    } else {
        for path in &scope.exclude_paths {
            writeln!(out, "- Exclude: `{path}`")?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Selected URLs")?;
    if selected.is_empty() {
        writeln!(out, "- No URLs selected")?;
    } else {
        for (i, url) in selected.iter().enumerate() {
            writeln!(out, "{}. `{url}`", i + 1)?;
        }
        if urls.len() > selected.len() {
            writeln!(
                out,
                "- Truncated to `max_pages`; {} additional URLs not shown",
                urls.len() - selected.len()
            )?;
        }
    }
    writeln!(out)?;

    let shots = &capture.screenshots;
    writeln!(out, "## Capture Settings")?;
    writeln!(
        out,
        "- Screenshots: desktop={}, mobile={}, tablet={}",
        shots.desktop.unwrap_or(false),
        shots.mobile.unwrap_or(false),
        shots.tablet.unwrap_or(false)
    )?;
    writeln!(out, "- HTML capture: `{}`", capture.html.unwrap_or(true))?;
    writeln!(out, "- CSS capture: `{}`", capture.css.unwrap_or(true))?;
    writeln!(out, "- Text capture: `{}`", capture.text.unwrap_or(true))?;
    writeln!(out, "- Asset metadata: `{}`", capture.asset_metadata.unwrap_or(true))?;
    writeln!(out, "- Component candidates: `{}`", capture.component_candidates.unwrap_or(true))?;
    writeln!(out)?;

    writeln!(out, "## Quality Controls")?;
    writeln!(
        out,
        "- Canonical token confidence threshold: `{}`",
        quality.canonical_token_confidence_threshold.unwrap_or(0.7)
    )?;
    writeln!(
        out,
        "- Low-confidence fallback: `{}`",
        quality.low_confidence_fallback.as_deref().unwrap_or("suggest_candidates")
    )?;
    writeln!(out, "- Contrast checks: `{}`", quality.require_contrast_checks.unwrap_or(true))?;
    writeln!(out, "- Anti-pattern report: `{}`", quality.require_anti_pattern_report.unwrap_or(true))?;
    writeln!(out, "- PNIE matrix: `{}`", quality.require_pnie_matrix.unwrap_or(true))?;
    writeln!(out)?;

    writeln!(out, "## Output Artifacts")?;
    match intake.output.artifacts.as_deref() {
        Some(artifacts) if !artifacts.is_empty() => {
            for artifact in artifacts {
                writeln!(out, "- `{artifact}`")?;
            }
        }
        _ => {
            for artifact in DEFAULT_ARTIFACTS {
                writeln!(out, "- `{artifact}`")?;
            }
        }
    }
    writeln!(out)?;

    writeln!(out, "## Warnings")?;
    let warnings = plan_warnings(intake, urls);
    if warnings.is_empty() {
        writeln!(out, "- None detected from configuration")?;
    } else {
        for warning in warnings {
            writeln!(out, "- {warning}")?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Estimated Workload")?;
    writeln!(out, "- Class: `{}`", workload_class(intake, selected.len()))?;
    writeln!(out)?;
    writeln!(out, "_Do not begin crawling until this run plan is reviewed._")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intake(max_pages: u64, mode: &str, shots: (bool, bool)) -> IntakeConfig {
        serde_json::from_value(json!({
            "project": {"name": "Acme", "source_url": "https://acme.test"},
            "scope": {"crawl_mode": mode, "max_pages": max_pages, "exclude_paths": ["/legal"]},
            "capture": {"screenshots": {"desktop": shots.0, "mobile": shots.1}},
        }))
        .unwrap()
    }

    #[test]
    fn test_workload_classes() {
        assert_eq!(workload_class(&intake(10, "representative_sample", (true, false)), 10), Workload::Fast);
        assert_eq!(workload_class(&intake(10, "representative_sample", (true, true)), 10), Workload::Fast);
        assert_eq!(workload_class(&intake(12, "bounded_full", (true, true)), 12), Workload::Medium);
        assert_eq!(workload_class(&intake(60, "sitemap", (true, false)), 3), Workload::Heavy);
    }

    #[test]
    fn test_urls_truncated_to_max_pages() {
        let urls: Vec<String> = (1..=5).map(|i| format!("https://acme.test/p{i}")).collect();
        let plan = render_run_plan(&intake(3, "custom_urls", (true, false)), &urls);
        assert!(plan.starts_with("# Run Plan Preview: Acme\n"));
        assert!(plan.contains("3. `https://acme.test/p3`"));
        assert!(!plan.contains("p4"));
        assert!(plan.contains("Truncated to `max_pages`; 2 additional URLs not shown"));
        assert!(plan.contains("- Exclude: `/legal`"));
        assert!(plan.contains("- None detected from configuration"));
        assert!(plan.trim_end().ends_with("_Do not begin crawling until this run plan is reviewed._"));
    }

    #[test]
    fn test_plan_warnings() {
        let mut cfg = intake(3, "custom_urls", (false, false));
        cfg.capture.css = Some(false);
        let plan = render_run_plan(&cfg, &[]);
        assert!(plan.contains("Desktop screenshots disabled"));
        assert!(plan.contains("CSS capture disabled"));
        assert!(plan.contains("No URLs selected yet"));
        assert!(plan.contains("- `tokens/tokens.json`"));
    }

    #[test]
    fn test_parse_url_list_shapes() {
        assert_eq!(parse_url_list(&json!(["a", "b"])).unwrap(), vec!["a", "b"]);
        assert_eq!(parse_url_list(&json!({"urls": ["a"]})).unwrap(), vec!["a"]);
        assert_eq!(
            parse_url_list(&json!({"pages": [{"url": "a"}, {"title": "x"}]})).unwrap(),
            vec!["a"]
        );
        assert!(parse_url_list(&json!({"links": []})).is_err());
        assert!(parse_url_list(&json!(42)).is_err());
    }
}
