//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use tokenprint::{CaptureManifest, CaptureStore, ManifestStore, Pipeline, RunConfig, RunOutcome};

pub const SOURCE: &str = "https://acme.test";

/// Rules that carry no token signal but count toward rule density.
/// 37 of them plus three or more real rules saturates the density term.
pub fn filler() -> String {
    (0..37).map(|i| format!(".u{i} {{ opacity: 0.9 }}\n")).collect()
}

/// A `docs` page with inline styles and optional inline markup.
pub fn page(id: &str, css: &str, markup: Option<&str>) -> Value {
    let mut page = json!({
        "id": id,
        "url": format!("{SOURCE}/docs/{id}"),
        "cluster_hint": "docs",
        "styles": {"inline": format!("{}{css}", filler())},
    });
    if let Some(m) = markup {
        page["markup"] = json!({"inline": m});
    }
    page
}

pub fn manifest(pages: Vec<Value>) -> CaptureManifest {
    let json = json!({"source_url": SOURCE, "pages": pages}).to_string();
    CaptureManifest::from_json_str(&json).unwrap()
}

pub fn store(pages: Vec<Value>) -> Arc<dyn CaptureStore> {
    Arc::new(ManifestStore::new(manifest(pages), "."))
}

pub fn fast_config() -> RunConfig {
    RunConfig {
        requests_per_second: 1000.0,
        ..RunConfig::default()
    }
}

pub async fn run_with(pages: Vec<Value>, config: RunConfig) -> RunOutcome {
    Pipeline::new(store(pages), config).unwrap().run(SOURCE).await.unwrap()
}

pub async fn run(pages: Vec<Value>) -> RunOutcome {
    run_with(pages, fast_config()).await
}

pub const SPACING_8PT: &str = ".s1 { padding: 8px } .s2 { margin: 16px } .s3 { gap: 24px } .s4 { padding: 32px }";
pub const SPACING_OUTLIER: &str = ".s1 { padding: 10px } .s2 { margin: 18px } .s3 { gap: 22px }";
