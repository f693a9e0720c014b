//! Run configuration: thresholds, tolerance bands, fallback policy, and
//! concurrency limits. Fixed for the lifetime of one pipeline run.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::intake::IntakeConfig;
use crate::types::{CanonError, CanonResult};

/// What to emit for a subcategory whose best candidate misses the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Offer the top candidates as a ranked suggestion.
    #[default]
    SuggestCandidates,
    /// Emit no value at all.
    MarkUnknown,
    /// Emit the numeric spread of the candidates.
    InferRanges,
}

impl FallbackPolicy {
    pub const ALL: [FallbackPolicy; 3] = [
        Self::SuggestCandidates,
        Self::MarkUnknown,
        Self::InferRanges,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SuggestCandidates => "suggest_candidates",
            Self::MarkUnknown => "mark_unknown",
            Self::InferRanges => "infer_ranges",
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FallbackPolicy {
    type Err = CanonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| CanonError::InvalidConfig(vec![format!("unknown fallback policy '{s}'")]))
    }
}

/// One request per this many seconds is the slowest supported rate.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Equivalence-class tolerance bands per value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// CIE76 ΔE under which two colors are the same token.
    pub color_delta_e: f64,
    /// Per-step tolerance for spacing and type scales.
    pub spacing_px: f64,
    /// Tolerance for single lengths (radius, border width, container width).
    pub length_px: f64,
    pub duration_ms: f64,
    /// Relative tolerance for unitless numbers.
    pub number_relative: f64,
    pub shadow_px: f64,
    pub shadow_alpha: f64,
    /// Minimum anatomy sequence similarity for two components to match.
    pub anatomy_similarity: f64,
    /// Literal sequences shorter than this are too generic to be a copy.
    pub copying_min_tokens: usize,
    /// Similarity to one page's literal sequence that counts as a copy.
    pub copying_similarity: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            color_delta_e: 6.0,
            spacing_px: 2.0,
            length_px: 1.0,
            duration_ms: 25.0,
            number_relative: 0.15,
            shadow_px: 2.0,
            shadow_alpha: 0.1,
            anatomy_similarity: 0.80,
            copying_min_tokens: 6,
            copying_similarity: 0.95,
        }
    }
}

/// Structural clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Minimum average-linkage similarity to join an existing cluster.
    pub similarity_threshold: f64,
    pub dom_weight: f64,
    pub selector_weight: f64,
    pub geometry_weight: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.60,
            dom_weight: 0.5,
            selector_weight: 0.3,
            geometry_weight: 0.2,
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub canonical_token_confidence_threshold: f64,
    pub low_confidence_fallback: FallbackPolicy,
    pub tolerances: Tolerances,
    pub cluster: ClusterConfig,
    /// Pages loaded and analyzed at once.
    pub concurrency: usize,
    /// Shared with the capture fetcher.
    pub requests_per_second: f64,
    pub page_timeout_ms: u64,
    /// Re-aggregation passes the validator may trigger.
    pub max_reaggregation_passes: u32,
    /// Confidence multiplier applied to contradicted subcategories per pass.
    pub contradiction_deflation: f64,
    /// Candidates offered by `suggest_candidates`.
    pub suggestion_count: usize,
    /// Ceiling on the evidence a single page can contribute to a candidate.
    pub page_evidence_cap: f64,
    /// Confidence multiplier applied to every entry of an aborted run.
    pub abort_deflation: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            canonical_token_confidence_threshold: 0.70,
            low_confidence_fallback: FallbackPolicy::SuggestCandidates,
            tolerances: Tolerances::default(),
            cluster: ClusterConfig::default(),
            concurrency: 4,
            requests_per_second: 2.0,
            page_timeout_ms: 15_000,
            max_reaggregation_passes: 2,
            contradiction_deflation: 0.85,
            suggestion_count: 3,
            page_evidence_cap: 0.60,
            abort_deflation: 0.85,
        }
    }
}

impl RunConfig {
    /// Shorthand for the confidence threshold.
    pub fn threshold(&self) -> f64 {
        self.canonical_token_confidence_threshold
    }

    /// Check every field, collecting all problems.
    pub fn validate(&self) -> CanonResult<()> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.canonical_token_confidence_threshold) {
            errors.push("canonical_token_confidence_threshold must be within [0, 1]".to_string());
        }
        if self.concurrency == 0 {
            errors.push("concurrency must be at least 1".to_string());
        }
        if !(self.requests_per_second >= MIN_REQUESTS_PER_SECOND && self.requests_per_second.is_finite()) {
            errors.push(format!("requests_per_second must be at least {MIN_REQUESTS_PER_SECOND}"));
        }
        if self.page_timeout_ms == 0 {
            errors.push("page_timeout_ms must be positive".to_string());
        }
        if !(self.contradiction_deflation > 0.0 && self.contradiction_deflation <= 1.0) {
            errors.push("contradiction_deflation must be within (0, 1]".to_string());
        }
        if !(self.page_evidence_cap > 0.0 && self.page_evidence_cap <= 1.0) {
            errors.push("page_evidence_cap must be within (0, 1]".to_string());
        }
        if !(self.abort_deflation > 0.0 && self.abort_deflation <= 1.0) {
            errors.push("abort_deflation must be within (0, 1]".to_string());
        }
        if self.suggestion_count == 0 {
            errors.push("suggestion_count must be at least 1".to_string());
        }

        let c = &self.cluster;
        if !(0.0..=1.0).contains(&c.similarity_threshold) {
            errors.push("cluster.similarity_threshold must be within [0, 1]".to_string());
        }
        if c.dom_weight < 0.0 || c.selector_weight < 0.0 || c.geometry_weight < 0.0 {
            errors.push("cluster weights must be non-negative".to_string());
        } else if c.dom_weight + c.selector_weight + c.geometry_weight <= 0.0 {
            errors.push("cluster weights must not all be zero".to_string());
        }

        let t = &self.tolerances;
        let bands = [
            ("color_delta_e", t.color_delta_e),
            ("spacing_px", t.spacing_px),
            ("length_px", t.length_px),
            ("duration_ms", t.duration_ms),
            ("number_relative", t.number_relative),
            ("shadow_px", t.shadow_px),
            ("shadow_alpha", t.shadow_alpha),
        ];
        for (name, value) in bands {
            if !(value >= 0.0) {
                errors.push(format!("tolerances.{name} must be non-negative"));
            }
        }
        if !(0.0..=1.0).contains(&t.anatomy_similarity) {
            errors.push("tolerances.anatomy_similarity must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&t.copying_similarity) {
            errors.push("tolerances.copying_similarity must be within [0, 1]".to_string());
        }
        if t.copying_min_tokens == 0 {
            errors.push("tolerances.copying_min_tokens must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CanonError::InvalidConfig(errors))
        }
    }

    /// Load a run configuration from JSON. Accepts either a `RunConfig`
    /// document or a normalized intake config, whose `quality` and `scope`
    /// sections supply the threshold, fallback, and request rate.
    pub fn from_json_str(json: &str) -> CanonResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let is_intake = value.get("quality").map(|q| q.is_object()).unwrap_or(false)
            && value.get("project").is_some();
        let config = if is_intake {
            let intake: IntakeConfig = serde_json::from_value(value)?;
            intake.run_config()?
        } else {
            serde_json::from_value(value)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CanonResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
