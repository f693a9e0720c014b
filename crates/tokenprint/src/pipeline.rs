//! Run orchestration.
//!
//! Pages are loaded and analyzed with bounded concurrency, a shared rate
//! limit, and a per-page timeout. Clustering, weighting, observation, and
//! aggregation are barriers: each starts only once every admitted page has
//! reached a terminal state. Validation may send the run back through the
//! aggregator a bounded number of times, each pass producing a new
//! generation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rayon::prelude::*;

use crate::aggregate::{Aggregator, Generation};
use crate::bundle::{BundleParts, CanonicalBundle, CaptureGap};
use crate::capture::{AbortHandle, AbortSignal, CaptureStore, PageCapture, RateLimiter};
use crate::cluster::cluster_pages;
use crate::config::RunConfig;
use crate::extract::{analyze, analyze_unavailable, observe, PageAnalysis, PageExtraction};
use crate::progress::{self, ProgressEventKind, ProgressSender, Stage};
use crate::types::{CanonError, CanonResult, EvidenceObservation, Page, PageId, PageStatus, ValidationFinding};
use crate::validate::{merge_findings, validate, Adjustment};
use crate::weight::{weigh, QualitySignals};

/// Terminal state of one page in the analysis stage.
enum PageOutcome {
    Analyzed(PageAnalysis),
    /// The page triggered a run-level abort.
    Aborted,
    /// The run was aborted before the page was admitted.
    NotAdmitted,
}

/// Everything a run produced. The bundle is the consumer-facing part;
/// generations and extractions are kept for diffing and audits.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub bundle: CanonicalBundle,
    pub generations: Vec<Generation>,
    pub extractions: Vec<PageExtraction>,
}

impl RunOutcome {
    pub fn aborted(&self) -> bool {
        self.bundle.partial
    }

    pub fn observations(&self) -> impl Iterator<Item = &EvidenceObservation> {
        self.extractions.iter().flat_map(|e| e.observations.iter())
    }
}

/// A configured pipeline over one capture store.
pub struct Pipeline {
    store: Arc<dyn CaptureStore>,
    config: RunConfig,
    abort: AbortHandle,
    progress: Option<ProgressSender>,
}

impl Pipeline {
    /// Create a pipeline. Fails if the configuration is invalid.
    pub fn new(store: Arc<dyn CaptureStore>, config: RunConfig) -> CanonResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            abort: AbortHandle::new(),
            progress: None,
        })
    }

    /// Use a caller-owned abort handle.
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the whole pipeline. An abort does not fail the run; the bundle
    /// comes back marked partial.
    pub async fn run(&self, source_url: &str) -> CanonResult<RunOutcome> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut seq = 0u64;
        let config = &self.config;
        let signal = self.abort.signal();

        let captures = self.store.pages();
        tracing::info!("Run {} over {} pages from {}", run_id, captures.len(), source_url);

        let (excluded, admissible): (Vec<PageCapture>, Vec<PageCapture>) = captures
            .into_iter()
            .partition(|c| c.status == PageStatus::Excluded);
        let mut excluded_pages: Vec<PageId> = excluded.into_iter().map(|c| c.id).collect();

        // Analyze
        let stage_start = Instant::now();
        self.emit(&run_id, &mut seq, stage_started(Stage::Analyze, format!("{} pages", admissible.len())));
        let mut analyses = self.analyze_pages(admissible, signal.clone()).await;
        analyses.sort_by(|a, b| a.page.id.cmp(&b.page.id));
        for a in &analyses {
            self.emit(
                &run_id,
                &mut seq,
                ProgressEventKind::PageAnalyzed {
                    page_id: a.page.id.to_string(),
                    status: a.page.status.name().to_string(),
                    signals: a.signals.len() as u32,
                },
            );
        }
        self.emit(&run_id, &mut seq, stage_completed(Stage::Analyze, analyses.len(), stage_start));

        let abort_reason = signal.reason();
        if let Some(reason) = &abort_reason {
            tracing::warn!("Run {} aborted: {}; continuing with {} analyzed pages", run_id, reason, analyses.len());
            self.emit(&run_id, &mut seq, ProgressEventKind::RunAborted { reason: reason.clone() });
        }

        let capture_gaps: Vec<CaptureGap> = analyses
            .iter()
            .filter(|a| !a.unobservable.is_empty())
            .map(|a| CaptureGap {
                page_id: a.page.id.clone(),
                url: a.page.url.clone(),
                missing: a.unobservable.clone(),
            })
            .collect();

        let (late_excluded, analyses): (Vec<PageAnalysis>, Vec<PageAnalysis>) = analyses
            .into_iter()
            .partition(|a| a.page.status == PageStatus::Excluded);
        excluded_pages.extend(late_excluded.into_iter().map(|a| a.page.id));
        excluded_pages.sort();

        // Cluster
        let stage_start = Instant::now();
        self.emit(&run_id, &mut seq, stage_started(Stage::Cluster, format!("{} pages", analyses.len())));
        let pages: Vec<Page> = analyses.iter().map(|a| a.page.clone()).collect();
        let mut clusters = cluster_pages(&pages, &config.cluster);
        self.emit(&run_id, &mut seq, stage_completed(Stage::Cluster, clusters.len(), stage_start));

        // Weigh
        let stage_start = Instant::now();
        self.emit(&run_id, &mut seq, stage_started(Stage::Weigh, format!("{} clusters", clusters.len())));
        let signals: BTreeMap<PageId, QualitySignals> =
            analyses.iter().map(|a| (a.page.id.clone(), a.quality.clone())).collect();
        let page_weights = weigh(&pages, &mut clusters, &signals);
        self.emit(&run_id, &mut seq, stage_completed(Stage::Weigh, page_weights.len(), stage_start));

        // Observe
        let stage_start = Instant::now();
        self.emit(&run_id, &mut seq, stage_started(Stage::Observe, format!("{} pages", analyses.len())));
        let weight_of: BTreeMap<&PageId, f64> =
            page_weights.iter().map(|w| (&w.page_id, w.quality_weight)).collect();
        let extractions: Vec<PageExtraction> = analyses
            .par_iter()
            .map(|a| observe(a, weight_of.get(&a.page.id).copied().unwrap_or(0.0)))
            .collect();
        let observations: Vec<EvidenceObservation> =
            extractions.iter().flat_map(|e| e.observations.iter().cloned()).collect();
        self.emit(&run_id, &mut seq, stage_completed(Stage::Observe, observations.len(), stage_start));

        // Aggregate and validate
        let stage_start = Instant::now();
        self.emit(
            &run_id,
            &mut seq,
            stage_started(Stage::Aggregate, format!("{} observations", observations.len())),
        );
        let mut aggregator = Aggregator::new(config, &observations, &page_weights, &clusters);
        if abort_reason.is_some() {
            tracing::warn!("Run aborted; confidence deflated by {}", config.abort_deflation);
            aggregator = aggregator.with_run_deflation(config.abort_deflation);
        }
        let mut deflations: BTreeMap<String, f64> = BTreeMap::new();
        let mut contested: BTreeSet<String> = BTreeSet::new();
        let mut generations: Vec<Generation> = Vec::new();
        let mut findings: Vec<ValidationFinding> = Vec::new();
        let mut adjustments: Vec<Adjustment>;
        let mut number = 1u32;
        loop {
            let generation = aggregator.aggregate_contested(number, &deflations, &contested);
            let outcome = validate(&generation, &observations, config);
            findings = merge_findings(findings, outcome.findings);
            adjustments = outcome.adjustments;

            self.emit(
                &run_id,
                &mut seq,
                ProgressEventKind::GenerationProduced {
                    number,
                    canonical: generation.canonical_count() as u32,
                    low_confidence: generation.low_confidence().count() as u32,
                    findings: findings.len() as u32,
                },
            );
            generations.push(generation);

            let passes = number - 1;
            if outcome.contradicted.is_empty() || passes >= config.max_reaggregation_passes {
                break;
            }
            // Contested subcategories stay unresolved in every later generation.
            for sub in outcome.contradicted {
                let d = deflations.entry(sub.clone()).or_insert(1.0);
                *d *= config.contradiction_deflation;
                contested.insert(sub);
            }
            tracing::info!("Re-aggregating with deflation {:?}", deflations);
            number += 1;
        }
        self.emit(&run_id, &mut seq, stage_completed(Stage::Aggregate, generations.len(), stage_start));

        let last = generations
            .last()
            .ok_or_else(|| CanonError::InvalidInput("aggregation produced no generation".into()))?;
        let bundle = CanonicalBundle::assemble(BundleParts {
            run_id: run_id.clone(),
            source_url: source_url.to_string(),
            config,
            generation: last,
            page_weights,
            clusters: clusters.clusters().to_vec(),
            findings,
            adjustments,
            capture_gaps,
            excluded_pages,
            abort_reason,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.emit(
            &run_id,
            &mut seq,
            ProgressEventKind::RunComplete {
                pages: pages.len() as u32,
                canonical: bundle.canonical_entries().count() as u32,
                findings: bundle.findings.len() as u32,
                elapsed_ms,
            },
        );
        tracing::info!(
            "Run {} complete in {} ms: {} entries, {} findings{}",
            run_id,
            elapsed_ms,
            bundle.entries.len(),
            bundle.findings.len(),
            if bundle.partial { " (partial)" } else { "" }
        );

        Ok(RunOutcome {
            bundle,
            generations,
            extractions,
        })
    }

    /// Load and analyze pages with bounded concurrency. Pages not yet
    /// admitted when the run aborts are skipped; in-flight pages drain.
    async fn analyze_pages(&self, captures: Vec<PageCapture>, signal: AbortSignal) -> Vec<PageAnalysis> {
        let limiter = Arc::new(RateLimiter::new(self.config.requests_per_second));
        let timeout = Duration::from_millis(self.config.page_timeout_ms);

        let outcomes: Vec<PageOutcome> = stream::iter(captures)
            .map(|capture| {
                let store = Arc::clone(&self.store);
                let limiter = Arc::clone(&limiter);
                let signal = signal.clone();
                let abort = self.abort.clone();
                async move {
                    if signal.is_aborted() {
                        return PageOutcome::NotAdmitted;
                    }
                    limiter.wait().await;
                    if signal.is_aborted() {
                        return PageOutcome::NotAdmitted;
                    }

                    match tokio::time::timeout(timeout, store.load(&capture)).await {
                        Ok(Ok(content)) => {
                            match tokio::task::spawn_blocking(move || analyze(&content)).await {
                                Ok(analysis) => PageOutcome::Analyzed(analysis),
                                Err(e) => {
                                    tracing::warn!("Analysis of {} failed: {e}", capture.id);
                                    PageOutcome::Analyzed(analyze_unavailable(&capture, "analysis_failed"))
                                }
                            }
                        }
                        Ok(Err(CanonError::RunAborted(reason))) => {
                            abort.abort(reason);
                            PageOutcome::Aborted
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("Failed to load {}: {e}", capture.id);
                            PageOutcome::Analyzed(analyze_unavailable(&capture, "load_failed"))
                        }
                        Err(_) => {
                            let err = CanonError::Timeout(timeout.as_millis() as u64);
                            tracing::warn!("Page {}: {err}; keeping it as partial", capture.id);
                            PageOutcome::Analyzed(analyze_unavailable(&capture, "timeout"))
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut skipped = 0usize;
        let analyses: Vec<PageAnalysis> = outcomes
            .into_iter()
            .filter_map(|o| match o {
                PageOutcome::Analyzed(a) => Some(a),
                PageOutcome::Aborted | PageOutcome::NotAdmitted => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            tracing::info!("{} pages not analyzed after abort", skipped);
        }
        analyses
    }

    fn emit(&self, run_id: &str, seq: &mut u64, event: ProgressEventKind) {
        progress::emit(&self.progress, run_id, seq, event);
    }
}

fn stage_started(stage: Stage, message: String) -> ProgressEventKind {
    tracing::debug!("{} started: {}", stage, message);
    ProgressEventKind::StageStarted { stage, message }
}

fn stage_completed(stage: Stage, count: usize, started: Instant) -> ProgressEventKind {
    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!("{} completed: {} items in {} ms", stage, count, duration_ms);
    ProgressEventKind::StageCompleted {
        stage,
        message: format!("{count} items"),
        duration_ms,
    }
}
