//! tokenprint — evidence aggregation core: clusters captured pages, weighs their evidence, and canonicalizes design tokens and components.

pub mod aggregate;
pub mod bundle;
pub mod capture;
pub mod cluster;
pub mod color;
pub mod config;
pub mod css;
pub mod extract;
pub mod intake;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod signature;
pub mod similarity;
pub mod types;
pub mod validate;
pub mod weight;

pub use aggregate::{Aggregator, Generation};
pub use bundle::{BundleEntry, BundleSink, CanonicalBundle, CaptureGap, JsonBundleWriter};
pub use capture::{AbortHandle, CaptureManifest, CaptureStore, ManifestStore, PageCapture, PageContent};
pub use cluster::{cluster_pages, ClusterSet};
pub use config::{FallbackPolicy, RunConfig, Tolerances};
pub use extract::{analyze, observe, PageAnalysis, PageExtraction};
pub use intake::{validate_intake, IntakeConfig, IntakeReport};
pub use pipeline::{Pipeline, RunOutcome};
pub use plan::{parse_url_list, render_run_plan, workload_class};
pub use signature::StructuralSignature;
pub use similarity::cosine_similarity;
pub use types::*;
pub use validate::{validate, Adjustment, ValidationOutcome};
pub use weight::{weigh, QualitySignals};
