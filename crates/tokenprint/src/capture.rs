//! Capture manifest records and the capture-store boundary.
//!
//! The fetcher and screenshot renderer live outside this crate. They hand
//! over a manifest of per-page records; the pipeline reads page content back
//! through the [`CaptureStore`] trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::types::{CanonError, CanonResult, PageId, PageStatus};

/// Warning tag: the capture timed out before the page settled.
pub const WARN_TIMEOUT: &str = "timeout";
/// Warning tag: client-side rendering had not finished.
pub const WARN_JS_INCOMPLETE: &str = "js_incomplete";
/// Warning tag: the page is disallowed by robots.txt. Aborts the run.
pub const WARN_ROBOTS_DISALLOWED: &str = "robots_disallowed";

/// Where a text capture lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentRef {
    Inline { inline: String },
    Path { path: PathBuf },
}

/// Where a screenshot lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScreenshotRef {
    Base64 {
        base64: String,
        #[serde(default)]
        mime: Option<String>,
    },
    Path { path: PathBuf },
}

/// Metadata for an asset referenced by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub url: String,
    pub kind: String,
    #[serde(default)]
    pub third_party: bool,
}

/// One page record of the capture manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCapture {
    pub id: PageId,
    pub url: String,
    #[serde(default)]
    pub cluster_hint: Option<String>,
    #[serde(default)]
    pub markup: Option<ContentRef>,
    #[serde(default)]
    pub styles: Option<ContentRef>,
    #[serde(default)]
    pub text: Option<ContentRef>,
    #[serde(default)]
    pub screenshot: Option<ScreenshotRef>,
    #[serde(default)]
    pub assets: Vec<AssetMeta>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub status: PageStatus,
}

impl PageCapture {
    pub fn has_warning(&self, tag: &str) -> bool {
        self.warnings.iter().any(|w| w == tag)
    }

    /// Third-party scripts and iframes among the page's assets.
    pub fn third_party_noise(&self) -> usize {
        self.assets
            .iter()
            .filter(|a| a.third_party && matches!(a.kind.as_str(), "script" | "iframe"))
            .count()
    }
}

/// The full capture manifest handed over by the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureManifest {
    pub source_url: String,
    #[serde(default)]
    pub crawl_mode: Option<String>,
    pub pages: Vec<PageCapture>,
}

impl CaptureManifest {
    pub fn from_json_str(json: &str) -> CanonResult<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        let mut seen = std::collections::BTreeSet::new();
        for page in &manifest.pages {
            if !seen.insert(page.id.clone()) {
                return Err(CanonError::InvalidInput(format!(
                    "duplicate page id '{}' in manifest",
                    page.id
                )));
            }
        }
        Ok(manifest)
    }
}

/// Raw screenshot bytes; decoded later on a blocking thread.
#[derive(Debug, Clone)]
pub struct ScreenshotData {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Loaded content of one page. Any part may be missing.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub capture: PageCapture,
    pub markup: Option<String>,
    pub styles: Option<String>,
    pub text: Option<String>,
    pub screenshot: Option<ScreenshotData>,
    /// Parts that were referenced but could not be loaded.
    pub load_gaps: Vec<String>,
}

/// Read access to captured pages.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Every page record, in manifest order.
    fn pages(&self) -> Vec<PageCapture>;

    /// Load one page's content. `RunAborted` stops the whole run; any other
    /// error only degrades that page.
    async fn load(&self, page: &PageCapture) -> CanonResult<PageContent>;
}

/// A capture store backed by a manifest file. Relative paths resolve
/// against the manifest's directory.
pub struct ManifestStore {
    manifest: CaptureManifest,
    base_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(manifest: CaptureManifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            base_dir: base_dir.into(),
        }
    }

    pub fn from_file(path: &Path) -> CanonResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let manifest = CaptureManifest::from_json_str(&json)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(manifest, base_dir))
    }

    pub fn manifest(&self) -> &CaptureManifest {
        &self.manifest
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn read_text(&self, r: &ContentRef) -> CanonResult<String> {
        match r {
            ContentRef::Inline { inline } => Ok(inline.clone()),
            ContentRef::Path { path } => Ok(tokio::fs::read_to_string(self.resolve(path)).await?),
        }
    }

    async fn load_part(
        &self,
        name: &str,
        r: Option<&ContentRef>,
        page_id: &PageId,
        gaps: &mut Vec<String>,
    ) -> Option<String> {
        match self.read_text(r?).await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to load {name} for {page_id}: {e}");
                gaps.push(name.to_string());
                None
            }
        }
    }

    async fn read_screenshot(&self, r: &ScreenshotRef) -> CanonResult<ScreenshotData> {
        use base64::Engine;
        match r {
            ScreenshotRef::Base64 { base64: data, mime } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| CanonError::InvalidInput(format!("Invalid base64: {e}")))?;
                Ok(ScreenshotData {
                    bytes,
                    mime: mime.clone(),
                })
            }
            ScreenshotRef::Path { path } => {
                let bytes = tokio::fs::read(self.resolve(path)).await?;
                Ok(ScreenshotData { bytes, mime: None })
            }
        }
    }
}

#[async_trait]
impl CaptureStore for ManifestStore {
    fn pages(&self) -> Vec<PageCapture> {
        self.manifest.pages.clone()
    }

    async fn load(&self, page: &PageCapture) -> CanonResult<PageContent> {
        if page.has_warning(WARN_ROBOTS_DISALLOWED) {
            return Err(CanonError::RunAborted(format!(
                "robots.txt disallows {} ({})",
                page.url, page.id
            )));
        }

        let mut load_gaps = Vec::new();
        let markup = self
            .load_part("markup", page.markup.as_ref(), &page.id, &mut load_gaps)
            .await;
        let styles = self
            .load_part("styles", page.styles.as_ref(), &page.id, &mut load_gaps)
            .await;
        let text = self
            .load_part("text", page.text.as_ref(), &page.id, &mut load_gaps)
            .await;

        let screenshot = match &page.screenshot {
            Some(r) => match self.read_screenshot(r).await {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!("Failed to load screenshot for {}: {e}", page.id);
                    load_gaps.push("screenshot".to_string());
                    None
                }
            },
            None => None,
        };

        Ok(PageContent {
            capture: page.clone(),
            markup,
            styles,
            text,
            screenshot,
            load_gaps,
        })
    }
}

/// Decode screenshot bytes, using the declared mime type when known.
pub fn decode_screenshot(data: &ScreenshotData) -> CanonResult<DynamicImage> {
    let format = match data.mime.as_deref() {
        Some("image/png") => Some(ImageFormat::Png),
        Some("image/jpeg") | Some("image/jpg") => Some(ImageFormat::Jpeg),
        Some("image/webp") => Some(ImageFormat::WebP),
        Some("image/gif") => Some(ImageFormat::Gif),
        _ => None,
    };

    let img = if let Some(fmt) = format {
        image::load_from_memory_with_format(&data.bytes, fmt)?
    } else {
        image::load_from_memory(&data.bytes)?
    };
    Ok(img)
}

/// Caller-side handle that aborts a run.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

/// Observer side of an [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Abort with a reason. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolves once the run has been aborted.
    pub async fn aborted(&mut self) -> Option<String> {
        self.rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|r| r.clone())
    }
}

/// Spaces out page loads to a fixed request rate.
#[derive(Debug)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        // A rate too small for a Duration waits as long as one can.
        let min_interval = if requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / requests_per_second).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if necessary to comply with the rate limit.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}
