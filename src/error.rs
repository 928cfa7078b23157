//! Error types for the export pipeline

use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while staging, rasterizing or paginating a document
#[derive(Error, Debug)]
pub enum Error {
    /// The staged clone could not be measured or rasterized
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Failed to mount or settle the offscreen staging host
    #[error("Staging failed: {0}")]
    StagingError(String),

    /// Failed to produce paint output or encode the raster
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to assemble the paginated document
    #[error("PDF assembly failed: {0}")]
    PdfError(String),

    /// An image or other sub-resource could not be loaded
    #[error("Failed to load resource {url}: {reason}")]
    ResourceError { url: String, reason: String },

    /// A staging host outlived its export; never produced on the normal path
    #[error("Staging host leaked: {0} host(s) still attached")]
    ResourceLeak(usize),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The export was cancelled at a suspension point
    #[error("Export cancelled")]
    Cancelled,

    /// An export is already running
    #[error("Export already in progress")]
    Busy,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filesystem error while saving or reading
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error should be reported as a capture failure to the user.
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, Error::CaptureFailed(_) | Error::ResourceError { .. })
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::PdfError(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::RenderError(err.to_string())
    }
}
