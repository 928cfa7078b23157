//! RFox Export
//!
//! Turns a rendered HTML document (a resume) into a paginated, print-ready PDF
//! independent of the viewport it is previewed in or the device pixel ratio.
//!
//! # Pipeline
//!
//! - **Layout Scaler**: keeps the on-screen preview fitted to its container
//! - **Stager**: deep-clones the document into an offscreen, fixed-width host
//! - **Rasterizer**: captures the staged clone at a fixed density
//! - **Paginator**: windows the tall raster across fixed-size PDF pages
//! - **Export Controller**: drives the above with a busy guard and cleanup
//!
//! # Example
//!
//! ```no_run
//! use rfexport::{DocumentSubtree, ExportConfig, ExportController, ExportOutcome, MemorySink};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExportConfig::default();
//! let sink = Arc::new(MemorySink::new());
//! let controller = ExportController::builder(config).sink(sink.clone()).build()?;
//!
//! let doc = DocumentSubtree::new("<div><h1>Jane Doe</h1><p>Chief Executive</p></div>");
//! if let ExportOutcome::Completed(report) = controller.export_now(&doc).await {
//!     println!("{} pages", report.page_count);
//! }
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod document;
pub mod export;
pub mod paginator;
pub mod scaler;
pub mod stager;
pub mod viewport;

// Block layout, paint and raster stages used by the capture step
pub mod rendering;

// Dedicated raster thread with an async facade
pub mod worker;

pub use document::{DocumentRoot, DocumentSubtree};
pub use export::{
    ArtifactSink, CancelHandle, Delivery, DirectorySink, ExportArtifact, ExportController,
    ExportEvent, ExportOutcome, ExportReport, ExportState, LogNotifier, MemorySink, Notifier,
    RecordingNotifier, ResumeSource,
};
pub use paginator::{PagePlan, PagePlacement, PageSize, Paginator};
pub use rendering::raster::{RasterImage, Rasterizer};
pub use rendering::resources::ImagePolicy;
pub use scaler::{LayoutScaler, ScaleTransform};
pub use stager::{SettlePolicy, StagedDocument, StagingHost};
pub use viewport::{ViewportContext, ViewportObserver};

/// Logical pixel width every document is captured at, whatever its displayed size.
pub const CANONICAL_WIDTH: u32 = 850;

/// Horizontal breathing room subtracted from the container before scaling the preview.
pub const PREVIEW_MARGIN: u32 = 32;

/// Filename the finished artifact is offered under.
pub const DEFAULT_FILENAME: &str = "Executive_Resume.pdf";

/// Configuration for the export pipeline
///
/// The defaults reproduce the browser behaviour the pipeline was built
/// around: an 850px canonical page captured at 2x on a white background,
/// windowed onto A4 pages and saved as `Executive_Resume.pdf`.
///
/// Every field is optional when deserializing, so a partial JSON file only
/// overrides what it names.
///
/// # Examples
///
/// ```
/// let cfg = rfexport::ExportConfig::default();
/// assert_eq!(cfg.canonical_width, 850);
/// assert_eq!(cfg.capture_density, 2);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Fixed logical width of the captured document
    pub canonical_width: u32,
    /// Margin subtracted from the container width by the layout scaler
    pub preview_margin: u32,
    /// Pixel density multiplier applied during rasterization
    pub capture_density: u32,
    /// Opaque background painted under the document
    pub background: String,
    /// What to do when an image fails to load
    pub image_policy: ImagePolicy,
    /// How the staged clone settles before capture
    pub settle: SettlePolicy,
    /// Delay used by `SettlePolicy::FixedDelay`
    pub settle_delay_ms: u64,
    /// Upper bound for loading a single sub-resource of the staged clone
    pub timeout_ms: u64,
    /// Upper bound for the whole resource settle, however many images there are
    pub settle_timeout_ms: u64,
    /// Upper bound for a single rasterization
    pub raster_timeout_ms: u64,
    /// Delay between a completed export and the `Finished` event
    pub post_export_delay_ms: u64,
    /// Delay between offering a hosted artifact and the `Finished` event
    pub hosted_feedback_delay_ms: u64,
    /// Filename the artifact is saved under
    pub filename: String,
    /// Physical page format of the output
    pub page_size: PageSize,
    /// User agent sent when fetching remote images
    pub user_agent: String,
    /// Whether `<img>` elements are loaded at all
    pub enable_images: bool,
    /// Directory relative image paths are resolved against
    pub base_dir: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            canonical_width: CANONICAL_WIDTH,
            preview_margin: PREVIEW_MARGIN,
            capture_density: 2,
            background: "#ffffff".to_string(),
            image_policy: ImagePolicy::Skip,
            settle: SettlePolicy::AwaitResources,
            settle_delay_ms: 500,
            timeout_ms: 10_000,
            settle_timeout_ms: 20_000,
            raster_timeout_ms: 30_000,
            post_export_delay_ms: 1500,
            hosted_feedback_delay_ms: 2000,
            filename: DEFAULT_FILENAME.to_string(),
            page_size: PageSize::A4,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) RFOX-Export/0.1".to_string(),
            enable_images: true,
            base_dir: None,
        }
    }
}

impl ExportConfig {
    /// Load a (possibly partial) configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: ExportConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.capture_density == 0 {
            return Err(Error::ConfigError("capture_density must be at least 1".into()));
        }
        if self.canonical_width == 0 {
            return Err(Error::ConfigError("canonical_width must be positive".into()));
        }
        if self.filename.trim().is_empty() {
            return Err(Error::ConfigError("filename must not be empty".into()));
        }
        if self.page_size.width_mm() <= 0.0 || self.page_size.height_mm() <= 0.0 {
            return Err(Error::ConfigError("page size must be positive".into()));
        }
        rendering::style::parse_color(&self.background)
            .ok_or_else(|| Error::ConfigError(format!("unrecognised background color {:?}", self.background)))?;
        Ok(())
    }

    /// Background color with any alpha forced opaque.
    pub fn background_color(&self) -> Result<rendering::style::Rgba> {
        rendering::style::parse_color(&self.background)
            .map(|c| c.opaque())
            .ok_or_else(|| Error::ConfigError(format!("unrecognised background color {:?}", self.background)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.canonical_width, 850);
        assert_eq!(config.preview_margin, 32);
        assert_eq!(config.filename, "Executive_Resume.pdf");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: ExportConfig = serde_json::from_str(r#"{ "capture_density": 3, "page_size": "letter" }"#).unwrap();
        assert_eq!(cfg.capture_density, 3);
        assert_eq!(cfg.page_size, PageSize::Letter);
        assert_eq!(cfg.canonical_width, 850);
    }

    #[test]
    fn validate_rejects_zero_density() {
        let cfg = ExportConfig { capture_density: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn background_is_forced_opaque() {
        let cfg = ExportConfig { background: "rgba(10, 20, 30, 0.5)".into(), ..Default::default() };
        let c = cfg.background_color().unwrap();
        assert_eq!((c.r, c.g, c.b, c.a), (10, 20, 30, 255));
    }
}
