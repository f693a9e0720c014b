//! Run-level guarantees: traceability, completeness, monotonicity,
//! determinism, and degraded runs (abort, timeout).

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use common::*;
use tokenprint::progress::{self, ProgressEventKind};
use tokenprint::signature::StructuralSignature;
use tokenprint::{
    cluster_pages, AbortHandle, Aggregator, CanonResult, CaptureStore, Category, EvidenceObservation,
    ManifestStore, ObservationId, ObservedValue, Page, PageCapture, PageContent, PageId, PageStatus,
    PageWeight, Pipeline, ResolutionStatus, RunConfig, WeightReason, WeightSignal,
};

// ─────────────────────── helpers ───────────────────────

fn mixed_pages() -> Vec<serde_json::Value> {
    vec![
        page("p1", SPACING_8PT, None),
        page("p2", SPACING_8PT, None),
        page("p3", SPACING_OUTLIER, None),
        page(
            "p4",
            ".btn { background: #2563eb } .card { border-radius: 8px }",
            Some(r#"<html><body><div class="card"><button class="btn">Go</button></div></body></html>"#),
        ),
    ]
}

fn docs_page(id: &str) -> Page {
    Page {
        id: PageId::new(id),
        url: format!("{SOURCE}/docs/{id}"),
        cluster_hint: Some("docs".into()),
        status: PageStatus::Ok,
        signature: StructuralSignature::default(),
        insufficient_style: false,
    }
}

fn weight(id: &str) -> PageWeight {
    PageWeight {
        page_id: PageId::new(id),
        quality_weight: 0.8,
        reasons: vec![WeightReason {
            signal: WeightSignal::Base,
            contribution: 0.8,
            detail: "fixture".into(),
        }],
    }
}

fn radius_obs(page: &str, px: f64, raw: f64) -> EvidenceObservation {
    EvidenceObservation {
        id: ObservationId::new(&PageId::new(page), 0),
        category: Category::Visual,
        subcategory: "radius.base".into(),
        value: ObservedValue::Dimension(tokenprint::Dimension::px(px)),
        page_id: PageId::new(page),
        raw_confidence: raw,
        occurrences: 3,
        low_confidence: false,
    }
}

/// Delays one page's load past any reasonable timeout.
struct SlowStore {
    inner: ManifestStore,
    slow: PageId,
}

#[async_trait]
impl CaptureStore for SlowStore {
    fn pages(&self) -> Vec<PageCapture> {
        self.inner.pages()
    }

    async fn load(&self, page: &PageCapture) -> CanonResult<PageContent> {
        if page.id == self.slow {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.load(page).await
    }
}

// ─────────────────────── traceability ───────────────────────

#[tokio::test]
async fn test_canonical_values_trace_to_observations() {
    let outcome = run(mixed_pages()).await;
    let known: BTreeSet<&ObservationId> = outcome.observations().map(|o| &o.id).collect();
    let weighted: BTreeSet<&PageId> = outcome.bundle.page_weights.iter().map(|w| &w.page_id).collect();

    assert!(outcome.bundle.canonical_entries().count() > 0);
    for entry in outcome.bundle.canonical_entries() {
        assert!(!entry.evidence.is_empty(), "{} has no evidence", entry.subcategory);
        for e in &entry.evidence {
            assert!(known.contains(&e.observation), "{} cites unknown {}", entry.subcategory, e.observation);
            assert!(weighted.contains(&e.page_id));
            assert!(e.cluster_id.is_some());
        }
    }
}

#[tokio::test]
async fn test_no_observation_is_dropped() {
    let outcome = run(mixed_pages()).await;
    let last = outcome.generations.last().unwrap();

    let mut by_sub: BTreeMap<&str, BTreeSet<&ObservationId>> = BTreeMap::new();
    for obs in outcome.observations() {
        by_sub.entry(obs.subcategory.as_str()).or_default().insert(&obs.id);
    }
    assert_eq!(by_sub.len(), last.results.len());

    for result in &last.results {
        // each observation sits in exactly one candidate
        let cited: Vec<&ObservationId> = result
            .candidates
            .iter()
            .flat_map(|c| c.evidence.iter().map(|e| &e.observation))
            .collect();
        let unique: BTreeSet<&ObservationId> = cited.iter().copied().collect();
        assert_eq!(cited.len(), unique.len(), "{}", result.subcategory);
        assert_eq!(&unique, &by_sub[result.subcategory.as_str()], "{}", result.subcategory);

        let entry = outcome.bundle.entry(&result.subcategory).unwrap();
        assert_eq!(
            entry.value.is_some() as usize + entry.accidental_variants.len(),
            result.candidates.len()
        );
        for pair in result.candidates.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}

// ─────────────────────── monotonicity ───────────────────────

#[test]
fn test_agreeing_evidence_never_lowers_confidence() {
    let config = RunConfig::default();
    let ids = ["a", "b", "c", "d"];
    let pages: Vec<Page> = ids.iter().map(|id| docs_page(id)).collect();
    let mut clusters = cluster_pages(&pages, &config.cluster);
    for c in clusters.clusters_mut() {
        c.cluster_weight = 0.8;
    }
    let weights: Vec<PageWeight> = ids.iter().map(|id| weight(id)).collect();

    let confidence_of = |obs: &[EvidenceObservation]| {
        let aggregator = Aggregator::new(&config, obs, &weights, &clusters);
        let generation = aggregator.aggregate(1, &BTreeMap::new());
        let result = generation.result("radius.base").unwrap();
        result
            .candidates
            .iter()
            .find(|c| c.value == ObservedValue::Dimension(tokenprint::Dimension::px(8.0)))
            .unwrap()
            .confidence
    };

    let mut obs = vec![radius_obs("a", 8.0, 0.5), radius_obs("b", 4.0, 0.4)];
    let mut previous = confidence_of(&obs);
    for (page, px, raw) in [("c", 8.5, 0.2), ("d", 8.0, 0.7), ("a", 8.0, 0.9)] {
        let mut extra = radius_obs(page, px, raw);
        extra.id = ObservationId::new(&PageId::new(page), obs.len());
        obs.push(extra);
        let next = confidence_of(&obs);
        assert!(next >= previous - 1e-12, "{next} < {previous} after adding {page}");
        previous = next;
    }
}

// ─────────────────────── determinism ───────────────────────

#[tokio::test]
async fn test_reruns_agree() {
    let first = run(mixed_pages()).await;
    let second = run(mixed_pages()).await;

    let partition = |o: &tokenprint::RunOutcome| -> Vec<Vec<PageId>> {
        o.bundle.clusters.iter().map(|c| c.members.clone()).collect()
    };
    assert_eq!(partition(&first), partition(&second));

    let summary = |o: &tokenprint::RunOutcome| -> Vec<(String, Option<String>, u64)> {
        o.bundle
            .entries
            .iter()
            .map(|e| {
                (
                    e.subcategory.clone(),
                    e.value.as_ref().map(ObservedValue::describe),
                    (e.confidence * 1e9).round() as u64,
                )
            })
            .collect()
    };
    assert_eq!(summary(&first), summary(&second));
    assert_ne!(first.bundle.run_id, second.bundle.run_id);
}

// ─────────────────────── degraded runs ───────────────────────

#[tokio::test]
async fn test_robots_abort_keeps_finished_pages() {
    let mut blocked = page("c", SPACING_8PT, None);
    blocked["warnings"] = json!(["robots_disallowed"]);
    let pages = vec![
        page("a", SPACING_8PT, None),
        page("b", SPACING_8PT, None),
        blocked,
        page("d", SPACING_8PT, None),
    ];
    let config = RunConfig {
        concurrency: 1,
        ..fast_config()
    };

    let (tx, mut rx) = progress::channel();
    let pipeline = Pipeline::new(store(pages), config).unwrap().with_progress(tx);
    let outcome = pipeline.run(SOURCE).await.unwrap();

    assert!(outcome.aborted());
    assert!(outcome.bundle.abort_reason.as_deref().unwrap().contains("robots.txt"));
    let weighted: Vec<&str> = outcome.bundle.page_weights.iter().map(|w| w.page_id.as_str()).collect();
    assert_eq!(weighted, vec!["a", "b"]);

    // two agreeing pages are still enough for a canonical scale
    let entry = outcome.bundle.entry("spacing.scale").unwrap();
    assert_eq!(entry.status, ResolutionStatus::Canonical);

    // but the partial run is trusted less than the same pages run cleanly
    let clean = run(vec![page("a", SPACING_8PT, None), page("b", SPACING_8PT, None)]).await;
    let clean_entry = clean.bundle.entry("spacing.scale").unwrap();
    assert!(!clean.aborted());
    assert_eq!(clean.bundle.confidence_deflation, 1.0);
    assert_eq!(outcome.bundle.confidence_deflation, 0.85);
    assert!(entry.confidence < clean_entry.confidence);
    assert!((entry.confidence - clean_entry.confidence * 0.85).abs() < 1e-9);

    let mut saw_abort = false;
    while let Ok(event) = rx.try_recv() {
        if let ProgressEventKind::RunAborted { reason } = event.event {
            assert!(reason.contains("robots.txt"));
            saw_abort = true;
        }
    }
    assert!(saw_abort);
}

#[tokio::test]
async fn test_external_abort_before_run() {
    let abort = AbortHandle::new();
    abort.abort("operator cancelled");
    let pipeline = Pipeline::new(store(mixed_pages()), fast_config())
        .unwrap()
        .with_abort(abort);
    let outcome = pipeline.run(SOURCE).await.unwrap();

    assert!(outcome.aborted());
    assert_eq!(outcome.bundle.abort_reason.as_deref(), Some("operator cancelled"));
    assert!(outcome.bundle.clusters.is_empty());
    assert!(outcome.bundle.entries.is_empty());
}

#[tokio::test]
async fn test_slow_page_times_out_as_partial() {
    let manifest = manifest(vec![
        page("fast1", SPACING_8PT, None),
        page("fast2", SPACING_8PT, None),
        page("slow", SPACING_8PT, None),
    ]);
    let store = Arc::new(SlowStore {
        inner: ManifestStore::new(manifest, "."),
        slow: PageId::new("slow"),
    });
    let config = RunConfig {
        page_timeout_ms: 50,
        ..fast_config()
    };
    let outcome = Pipeline::new(store, config).unwrap().run(SOURCE).await.unwrap();

    assert!(!outcome.aborted());
    let gap = outcome
        .bundle
        .capture_gaps
        .iter()
        .find(|g| g.page_id == PageId::new("slow"))
        .unwrap();
    assert_eq!(gap.missing, vec!["timeout".to_string()]);

    let slow_weight = outcome
        .bundle
        .page_weights
        .iter()
        .find(|w| w.page_id == PageId::new("slow"))
        .unwrap();
    assert!(slow_weight
        .reasons
        .iter()
        .any(|r| r.signal == WeightSignal::RenderIncompletePenalty));
    assert!(outcome.observations().all(|o| o.page_id != PageId::new("slow")));
}
