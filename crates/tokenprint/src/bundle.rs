//! The canonical bundle handed to narrative generation and packaging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::Generation;
use crate::config::{FallbackPolicy, RunConfig};
use crate::types::{
    CanonResult, Candidate, Category, Cluster, EvidenceRef, FallbackResolution, ObservedValue, PageId,
    PageWeight, ResolutionStatus, TokenGroup, ValidationFinding,
};
use crate::validate::Adjustment;

/// One subcategory in the bundle: the canonical value (if any), its
/// evidence, and every variant that lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntry {
    pub subcategory: String,
    pub group: TokenGroup,
    pub category: Category,
    pub status: ResolutionStatus,
    /// Present only for canonical entries.
    pub value: Option<ObservedValue>,
    /// Confidence of the best candidate, canonical or not.
    pub confidence: f64,
    pub evidence: Vec<EvidenceRef>,
    pub accidental_variants: Vec<Candidate>,
    pub fallback: Option<FallbackResolution>,
    pub adjustments: Vec<Adjustment>,
}

/// Capture parts a page could not provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureGap {
    pub page_id: PageId,
    pub url: String,
    pub missing: Vec<String>,
}

/// Complete output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalBundle {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub source_url: String,
    /// True when the run was aborted before every page was analyzed.
    pub partial: bool,
    pub abort_reason: Option<String>,
    /// Multiplier already folded into every confidence; below 1.0 when partial.
    #[serde(default = "unit_deflation")]
    pub confidence_deflation: f64,
    pub threshold: f64,
    pub fallback: FallbackPolicy,
    /// Number of the generation the entries come from.
    pub generation: u32,
    pub page_weights: Vec<PageWeight>,
    pub clusters: Vec<Cluster>,
    pub entries: Vec<BundleEntry>,
    pub findings: Vec<ValidationFinding>,
    pub capture_gaps: Vec<CaptureGap>,
    pub excluded_pages: Vec<PageId>,
}

/// Inputs to [`CanonicalBundle::assemble`].
pub struct BundleParts<'a> {
    pub run_id: String,
    pub source_url: String,
    pub config: &'a RunConfig,
    pub generation: &'a Generation,
    pub page_weights: Vec<PageWeight>,
    pub clusters: Vec<Cluster>,
    pub findings: Vec<ValidationFinding>,
    pub adjustments: Vec<Adjustment>,
    pub capture_gaps: Vec<CaptureGap>,
    pub excluded_pages: Vec<PageId>,
    pub abort_reason: Option<String>,
}

fn unit_deflation() -> f64 {
    1.0
}

impl CanonicalBundle {
    pub fn assemble(parts: BundleParts<'_>) -> Self {
        let mut adjustments: BTreeMap<String, Vec<Adjustment>> = BTreeMap::new();
        for adj in parts.adjustments {
            adjustments.entry(adj.subcategory.clone()).or_default().push(adj);
        }

        let mut entries: Vec<BundleEntry> = parts
            .generation
            .results
            .iter()
            .map(|r| BundleEntry {
                subcategory: r.subcategory.clone(),
                group: TokenGroup::of(&r.subcategory),
                category: r.category,
                status: r.status,
                value: r.canonical.as_ref().map(|c| c.value.clone()),
                confidence: r.candidates.first().map(|c| c.confidence).unwrap_or(0.0),
                evidence: r.canonical.as_ref().map(|c| c.evidence.clone()).unwrap_or_default(),
                accidental_variants: r.accidental_variants().to_vec(),
                fallback: r.fallback.clone(),
                adjustments: adjustments.remove(&r.subcategory).unwrap_or_default(),
            })
            .collect();
        entries.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.subcategory.cmp(&b.subcategory)));

        Self {
            run_id: parts.run_id,
            generated_at: Utc::now(),
            source_url: parts.source_url,
            partial: parts.abort_reason.is_some(),
            abort_reason: parts.abort_reason,
            confidence_deflation: parts.generation.run_deflation,
            threshold: parts.config.threshold(),
            fallback: parts.config.low_confidence_fallback,
            generation: parts.generation.number,
            page_weights: parts.page_weights,
            clusters: parts.clusters,
            entries,
            findings: parts.findings,
            capture_gaps: parts.capture_gaps,
            excluded_pages: parts.excluded_pages,
        }
    }

    pub fn entry(&self, subcategory: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.subcategory == subcategory)
    }

    pub fn entries_in(&self, group: TokenGroup) -> impl Iterator<Item = &BundleEntry> {
        self.entries.iter().filter(move |e| e.group == group)
    }

    pub fn canonical_entries(&self) -> impl Iterator<Item = &BundleEntry> {
        self.entries.iter().filter(|e| e.status == ResolutionStatus::Canonical)
    }

    pub fn to_json(&self) -> CanonResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> CanonResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Destination for a finished bundle (packaging is external).
#[async_trait]
pub trait BundleSink: Send + Sync {
    async fn write(&self, bundle: &CanonicalBundle) -> CanonResult<()>;
}

/// Writes the bundle as pretty-printed JSON to a file.
pub struct JsonBundleWriter {
    path: PathBuf,
}

impl JsonBundleWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BundleSink for JsonBundleWriter {
    async fn write(&self, bundle: &CanonicalBundle) -> CanonResult<()> {
        let json = bundle.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        tracing::info!(
            "Wrote bundle {} ({} entries, {} findings) to {}",
            bundle.run_id,
            bundle.entries.len(),
            bundle.findings.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalValue, ObservationId, SubcategoryResult};

    fn generation() -> Generation {
        let evidence = vec![EvidenceRef {
            observation: ObservationId::new(&PageId::new("a"), 0),
            page_id: PageId::new("a"),
            cluster_id: None,
        }];
        let candidate = |c: f64, px: f64| Candidate {
            subcategory: "radius.base".into(),
            value: ObservedValue::Dimension(crate::types::Dimension::px(px)),
            confidence: c,
            support: c,
            agreement: 1.0,
            evidence: evidence.clone(),
            pages: vec![PageId::new("a")],
            clusters: Vec::new(),
        };
        Generation {
            number: 1,
            results: vec![SubcategoryResult {
                subcategory: "radius.base".into(),
                category: Category::Visual,
                status: ResolutionStatus::Canonical,
                canonical: Some(CanonicalValue {
                    subcategory: "radius.base".into(),
                    value: ObservedValue::Dimension(crate::types::Dimension::px(8.0)),
                    confidence: 0.8,
                    evidence: evidence.clone(),
                }),
                candidates: vec![candidate(0.8, 8.0), candidate(0.2, 2.0)],
                fallback: None,
            }],
            deflations: BTreeMap::new(),
            contested: Default::default(),
            run_deflation: 1.0,
        }
    }

    fn bundle(abort: Option<&str>) -> CanonicalBundle {
        let config = RunConfig::default();
        let g = generation();
        CanonicalBundle::assemble(BundleParts {
            run_id: "run-1".into(),
            source_url: "https://acme.test".into(),
            config: &config,
            generation: &g,
            page_weights: Vec::new(),
            clusters: Vec::new(),
            findings: Vec::new(),
            adjustments: Vec::new(),
            capture_gaps: Vec::new(),
            excluded_pages: Vec::new(),
            abort_reason: abort.map(String::from),
        })
    }

    #[test]
    fn test_entries_carry_variants() {
        let b = bundle(None);
        let entry = b.entry("radius.base").unwrap();
        assert_eq!(entry.group, TokenGroup::Radius);
        assert_eq!(entry.accidental_variants.len(), 1);
        assert_eq!(entry.evidence.len(), 1);
        assert!(!b.partial);
        assert_eq!(b.confidence_deflation, 1.0);
        assert_eq!(b.entries_in(TokenGroup::Radius).count(), 1);
    }

    #[test]
    fn test_aborted_bundle_is_partial() {
        let b = bundle(Some("robots_disallowed on /admin"));
        assert!(b.partial);
        assert_eq!(b.abort_reason.as_deref(), Some("robots_disallowed on /admin"));
    }

    #[tokio::test]
    async fn test_json_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("bundle.json");
        let writer = JsonBundleWriter::new(&path);
        writer.write(&bundle(None)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed = CanonicalBundle::from_json(&text).unwrap();
        assert_eq!(parsed.run_id, "run-1");
        assert_eq!(parsed.entries.len(), 1);
    }
}
