//! File-level entry points for each subcommand.
//!
//! Everything here returns data rather than printing, so the binary owns
//! stdout/stderr and the tests can drive the same paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value;

use tokenprint::progress::{self, ProgressEventKind, ProgressReceiver};
use tokenprint::{
    parse_url_list, render_run_plan, validate_intake, AbortHandle, BundleSink, IntakeConfig, IntakeReport,
    JsonBundleWriter, ManifestStore, Pipeline, RunConfig, RunOutcome,
};

/// Exit code for failed validation or a failed run.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a run that was aborted but still wrote a partial bundle.
pub const EXIT_ABORTED: i32 = 2;

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON in {}", path.display()))
}

/// Validate an intake config file.
pub fn validate_config_file(path: &Path, strict_guardrails: bool) -> anyhow::Result<IntakeReport> {
    let doc = read_json(path)?;
    Ok(validate_intake(&doc, strict_guardrails))
}

/// Render the run-plan markdown for an intake config and optional URL list.
pub fn render_plan_files(config: &Path, urls: Option<&Path>) -> anyhow::Result<String> {
    let doc = read_json(config)?;
    let intake: IntakeConfig = serde_json::from_value(doc)
        .with_context(|| format!("{} is not a normalized intake config", config.display()))?;
    let urls = match urls {
        Some(path) => parse_url_list(&read_json(path)?).with_context(|| format!("bad URL list in {}", path.display()))?,
        None => Vec::new(),
    };
    Ok(render_run_plan(&intake, &urls))
}

/// Load a run configuration, or the defaults when no file is given.
pub fn load_run_config(path: Option<&Path>) -> anyhow::Result<RunConfig> {
    match path {
        Some(p) => RunConfig::from_file(p).with_context(|| format!("invalid run config {}", p.display())),
        None => Ok(RunConfig::default()),
    }
}

/// Parameters of a `run` invocation.
pub struct ManifestRun {
    pub manifest: PathBuf,
    pub config: RunConfig,
    pub output: PathBuf,
    /// Overrides the manifest's `source_url`.
    pub source_url: Option<String>,
    pub abort: Option<AbortHandle>,
}

/// Run the pipeline over a capture manifest and write the bundle. An
/// aborted run still writes its partial bundle; check
/// [`RunOutcome::aborted`].
pub async fn run_manifest(run: ManifestRun) -> anyhow::Result<RunOutcome> {
    let store = ManifestStore::from_file(&run.manifest)
        .with_context(|| format!("failed to load manifest {}", run.manifest.display()))?;
    let source_url = match run.source_url {
        Some(url) => url,
        None => store.manifest().source_url.clone(),
    };
    if source_url.trim().is_empty() {
        bail!("no source URL in manifest and none given");
    }

    let (tx, rx) = progress::channel();
    let logger = tokio::spawn(log_progress(rx));

    let mut pipeline = Pipeline::new(Arc::new(store), run.config)
        .context("invalid run config")?
        .with_progress(tx);
    if let Some(abort) = run.abort {
        pipeline = pipeline.with_abort(abort);
    }
    let outcome = pipeline.run(&source_url).await;
    // Dropping the pipeline closes the channel and ends the logger.
    drop(pipeline);
    let _ = logger.await;
    let outcome = outcome.context("pipeline run failed")?;

    JsonBundleWriter::new(&run.output)
        .write(&outcome.bundle)
        .await
        .with_context(|| format!("failed to write bundle to {}", run.output.display()))?;
    Ok(outcome)
}

async fn log_progress(mut rx: ProgressReceiver) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => match &event.event {
                ProgressEventKind::Warning { message } => tracing::warn!("[{}] {}", event.seq, message),
                other => tracing::debug!("[{}] {:?}", event.seq, other),
            },
            Err(RecvError::Lagged(n)) => tracing::debug!("progress log skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_has_context() {
        let err = validate_config_file(Path::new("/nonexistent/intake.json"), false).unwrap_err();
        assert!(err.to_string().contains("failed to read /nonexistent/intake.json"));
    }

    #[test]
    fn test_default_run_config() {
        let config = load_run_config(None).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_bad_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = render_plan_files(&path, None).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse JSON"));
    }
}
