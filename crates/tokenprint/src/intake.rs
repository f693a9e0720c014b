//! Normalized intake configuration: the document a run is planned from.
//!
//! Validation works on the raw JSON value so that every type error can be
//! reported against its path, instead of failing on the first field serde
//! rejects. The typed [`IntakeConfig`] is lenient and only used once a
//! document is known to be usable.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{FallbackPolicy, RunConfig};
use crate::types::CanonResult;

/// The only supported modernization mode.
pub const MODE: &str = "brand_faithful_modernization";

pub const AUDIENCES: [&str; 3] = ["both", "designer", "developer"];
pub const INTENDED_USES: [&str; 3] = ["client_work", "internal_exploration", "rebuild_baseline"];
pub const CRAWL_MODES: [&str; 4] = ["bounded_full", "custom_urls", "representative_sample", "sitemap"];

/// Low-value paths a scope is expected to exclude at least one of.
pub const DEFAULT_EXCLUDE_HINTS: [&str; 5] = ["/careers", "/legal", "/login", "/privacy", "/terms"];

const GUARDRAIL_FLAGS: [&str; 3] = [
    "public_access_confirmed",
    "non_clone_intent_confirmed",
    "asset_rights_warning_confirmed",
];

/// Typed view of an intake document. Every field is optional so that a
/// partially filled document can still be rendered as a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub mode: Option<String>,
    pub project: ProjectSection,
    pub scope: ScopeSection,
    pub capture: CaptureSection,
    pub quality: QualitySection,
    pub guardrails: Option<Guardrails>,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub output_audience: Option<String>,
    pub intended_use: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSection {
    pub crawl_mode: Option<String>,
    pub max_pages: Option<u64>,
    pub max_depth: Option<u64>,
    pub include_subdomains: Option<bool>,
    pub respect_robots_txt: Option<bool>,
    pub crawl_delay_ms: Option<u64>,
    pub requests_per_second: Option<f64>,
    pub exclude_paths: Vec<String>,
    pub custom_urls: Vec<String>,
    pub sitemap_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Screenshots {
    pub desktop: Option<bool>,
    pub mobile: Option<bool>,
    pub tablet: Option<bool>,
}

impl Screenshots {
    /// Number of enabled viewports.
    pub fn enabled(&self) -> usize {
        [self.desktop, self.mobile, self.tablet]
            .iter()
            .filter(|v| **v == Some(true))
            .count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub screenshots: Screenshots,
    pub html: Option<bool>,
    pub css: Option<bool>,
    pub text: Option<bool>,
    pub asset_metadata: Option<bool>,
    pub component_candidates: Option<bool>,
    pub computed_css_samples: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    pub canonical_token_confidence_threshold: Option<f64>,
    pub low_confidence_fallback: Option<String>,
    pub require_contrast_checks: Option<bool>,
    pub require_anti_pattern_report: Option<bool>,
    pub require_pnie_matrix: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Guardrails {
    pub public_access_confirmed: Option<bool>,
    pub non_clone_intent_confirmed: Option<bool>,
    pub asset_rights_warning_confirmed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub artifacts: Option<Vec<String>>,
    pub formats: Option<Value>,
}

impl IntakeConfig {
    pub fn from_json_str(json: &str) -> CanonResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Derive the pipeline configuration from the quality and scope sections.
    pub fn run_config(&self) -> CanonResult<RunConfig> {
        let mut config = RunConfig::default();
        if let Some(threshold) = self.quality.canonical_token_confidence_threshold {
            config.canonical_token_confidence_threshold = threshold;
        }
        if let Some(fallback) = &self.quality.low_confidence_fallback {
            config.low_confidence_fallback = fallback.parse::<FallbackPolicy>()?;
        }
        if let Some(rps) = self.scope.requests_per_second {
            config.requests_per_second = rps;
        }
        Ok(config)
    }
}

/// Outcome of validating an intake document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IntakeReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl fmt::Display) {
        self.errors.push(format!("{path}: {message}"));
    }

    fn warn(&mut self, path: &str, message: impl fmt::Display) {
        self.warnings.push(format!("{path}: {message}"));
    }

    /// One-line summary in the style of the report footer.
    pub fn summary(&self) -> String {
        if self.is_ok() {
            format!("Config validation passed ({} warning(s))", self.warnings.len())
        } else {
            format!(
                "Config validation failed ({} error(s), {} warning(s))",
                self.errors.len(),
                self.warnings.len()
            )
        }
    }
}

/// Validate a raw intake document. With `strict_guardrails`, every guardrail
/// confirmation must be present and true.
pub fn validate_intake(doc: &Value, strict_guardrails: bool) -> IntakeReport {
    let mut report = IntakeReport::default();
    let Some(cfg) = doc.as_object() else {
        report.error("$", "config must be a top-level JSON object");
        return report;
    };

    validate_guardrails(cfg, &mut report);
    validate_project(cfg, &mut report);
    validate_scope(cfg, &mut report);
    validate_capture(cfg, &mut report);
    validate_quality(cfg, &mut report);
    validate_output(cfg, &mut report);

    if strict_guardrails {
        match cfg.get("guardrails").and_then(Value::as_object) {
            None => report.error("guardrails", "required when strict guardrails are enabled"),
            Some(guardrails) => {
                for key in GUARDRAIL_FLAGS {
                    if guardrails.get(key) != Some(&Value::Bool(true)) {
                        report.error(&format!("guardrails.{key}"), "must be true before crawling");
                    }
                }
            }
        }
    }

    report
}

fn is_http_url(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .map(|s| s.starts_with("http://") || s.starts_with("https://"))
        .unwrap_or(false)
}

fn one_of(value: Option<&Value>, allowed: &[&str]) -> bool {
    value
        .and_then(Value::as_str)
        .map(|s| allowed.contains(&s))
        .unwrap_or(false)
}

fn expect_bool(obj: &Map<String, Value>, key: &str, path: &str, report: &mut IntakeReport) {
    let full = format!("{path}.{key}");
    match obj.get(key) {
        None => report.error(&full, "missing required boolean"),
        Some(Value::Bool(_)) => {}
        Some(_) => report.error(&full, "must be boolean"),
    }
}

fn expect_number(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    minimum: f64,
    integer: bool,
    report: &mut IntakeReport,
) {
    let full = format!("{path}.{key}");
    let Some(value) = obj.get(key) else {
        report.error(&full, "missing required number");
        return;
    };
    let number = if integer {
        value.as_i64().map(|n| n as f64)
    } else {
        value.as_f64()
    };
    match number {
        None => report.error(&full, "must be a number"),
        Some(n) if n < minimum => report.error(&full, format!("must be >= {minimum}")),
        Some(_) => {}
    }
}

fn validate_guardrails(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    if cfg.get("mode").and_then(Value::as_str) != Some(MODE) {
        report.error("mode", format!("must equal '{MODE}'"));
    }

    match cfg.get("guardrails") {
        None | Some(Value::Null) => {}
        Some(Value::Object(guardrails)) => {
            for key in GUARDRAIL_FLAGS {
                if matches!(guardrails.get(key), Some(v) if !v.is_boolean()) {
                    report.error(&format!("guardrails.{key}"), "must be boolean");
                }
            }
        }
        Some(_) => report.error("guardrails", "must be an object if provided"),
    }
}

fn validate_project(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    let Some(project) = cfg.get("project").and_then(Value::as_object) else {
        report.error("project", "missing required object");
        return;
    };

    let name_ok = project
        .get("name")
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if !name_ok {
        report.error("project.name", "must be a non-empty string");
    }

    let source_url = project.get("source_url");
    if !is_http_url(source_url) {
        report.error("project.source_url", "must be a public http(s) URL");
    } else if let Some(url) = source_url.and_then(Value::as_str) {
        if url.contains("localhost") || url.contains("127.0.0.1") {
            report.warn(
                "project.source_url",
                "looks local/private; only public websites are supported",
            );
        }
    }

    if !one_of(project.get("output_audience"), &AUDIENCES) {
        report.error("project.output_audience", format!("must be one of {AUDIENCES:?}"));
    }
    if !one_of(project.get("intended_use"), &INTENDED_USES) {
        report.error("project.intended_use", format!("must be one of {INTENDED_USES:?}"));
    }
}

fn validate_scope(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    let Some(scope) = cfg.get("scope").and_then(Value::as_object) else {
        report.error("scope", "missing required object");
        return;
    };

    let crawl_mode = scope.get("crawl_mode").and_then(Value::as_str);
    if !one_of(scope.get("crawl_mode"), &CRAWL_MODES) {
        report.error("scope.crawl_mode", format!("must be one of {CRAWL_MODES:?}"));
    }

    expect_number(scope, "max_pages", "scope", 1.0, true, report);
    expect_number(scope, "max_depth", "scope", 0.0, true, report);
    expect_bool(scope, "include_subdomains", "scope", report);
    expect_bool(scope, "respect_robots_txt", "scope", report);
    expect_number(scope, "crawl_delay_ms", "scope", 0.0, true, report);
    expect_number(scope, "requests_per_second", "scope", 0.1, false, report);

    let exclude_paths = scope.get("exclude_paths").and_then(Value::as_array);
    match exclude_paths {
        Some(paths) if paths.iter().all(Value::is_string) => {
            let hinted = paths
                .iter()
                .filter_map(Value::as_str)
                .any(|p| DEFAULT_EXCLUDE_HINTS.contains(&p));
            if !hinted {
                report.warn(
                    "scope.exclude_paths",
                    "does not include common low-value paths (/legal,/privacy,/terms,/careers,/login)",
                );
            }
        }
        _ => report.error("scope.exclude_paths", "must be a list of strings"),
    }

    let non_empty = |key: &str| match scope.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    };

    if crawl_mode == Some("custom_urls") {
        match scope.get("custom_urls").and_then(Value::as_array) {
            Some(urls) if !urls.is_empty() => {
                if !urls.iter().all(|u| is_http_url(Some(u))) {
                    report.error("scope.custom_urls", "all entries must be http(s) URLs");
                }
            }
            _ => report.error(
                "scope.custom_urls",
                "required non-empty list when crawl_mode=custom_urls",
            ),
        }
    } else if non_empty("custom_urls") {
        report.warn("scope.custom_urls", "ignored unless crawl_mode=custom_urls");
    }

    if crawl_mode == Some("sitemap") {
        if !is_http_url(scope.get("sitemap_url")) {
            report.error("scope.sitemap_url", "required http(s) URL when crawl_mode=sitemap");
        }
    } else if non_empty("sitemap_url") {
        report.warn("scope.sitemap_url", "ignored unless crawl_mode=sitemap");
    }
}

fn validate_capture(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    let Some(capture) = cfg.get("capture").and_then(Value::as_object) else {
        report.error("capture", "missing required object");
        return;
    };

    match capture.get("screenshots").and_then(Value::as_object) {
        None => report.error("capture.screenshots", "missing required object"),
        Some(screenshots) => {
            for key in ["desktop", "mobile", "tablet"] {
                if matches!(screenshots.get(key), Some(v) if !v.is_boolean()) {
                    report.error(&format!("capture.screenshots.{key}"), "must be boolean");
                }
            }
            if screenshots.get("desktop") != Some(&Value::Bool(true)) {
                report.error("capture.screenshots.desktop", "must be true (required)");
            }
            if screenshots.get("mobile") != Some(&Value::Bool(true)) {
                report.warn(
                    "capture.screenshots.mobile",
                    "recommended true for better visual hierarchy coverage",
                );
            }
        }
    }

    for key in ["html", "css", "text", "asset_metadata", "component_candidates"] {
        expect_bool(capture, key, "capture", report);
    }
    if matches!(capture.get("computed_css_samples"), Some(v) if !v.is_boolean()) {
        report.error("capture.computed_css_samples", "must be boolean if provided");
    }

    if capture.get("css") == Some(&Value::Bool(false)) {
        report.warn("capture.css", "disabling CSS reduces token extraction quality");
    }
    if capture.get("text") == Some(&Value::Bool(false)) {
        report.warn("capture.text", "disabling text reduces voice extraction quality");
    }
}

fn validate_quality(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    let Some(quality) = cfg.get("quality").and_then(Value::as_object) else {
        report.error("quality", "missing required object");
        return;
    };

    let key = "canonical_token_confidence_threshold";
    expect_number(quality, key, "quality", 0.0, false, report);
    if let Some(threshold) = quality.get(key).and_then(Value::as_f64) {
        if threshold > 1.0 {
            report.error(&format!("quality.{key}"), "must be <= 1");
        } else if threshold < 0.7 {
            report.warn(&format!("quality.{key}"), "below recommended default 0.70");
        }
    }

    let allowed: Vec<&str> = FallbackPolicy::ALL.iter().map(|p| p.name()).collect();
    if !one_of(quality.get("low_confidence_fallback"), &allowed) {
        report.error(
            "quality.low_confidence_fallback",
            format!("must be one of {allowed:?}"),
        );
    }

    for key in [
        "require_contrast_checks",
        "require_anti_pattern_report",
        "require_pnie_matrix",
    ] {
        expect_bool(quality, key, "quality", report);
    }
}

fn validate_output(cfg: &Map<String, Value>, report: &mut IntakeReport) {
    match cfg.get("output") {
        None | Some(Value::Null) => {}
        Some(Value::Object(output)) => {
            if let Some(formats) = output.get("formats").and_then(Value::as_object) {
                let disabled = |k: &str| formats.get(k) == Some(&Value::Bool(false));
                if disabled("markdown") || disabled("json") {
                    report.warn("output.formats", "markdown and json are both required");
                }
            }
        }
        Some(_) => report.warn("output", "should be an object if provided"),
    }
}
