//! Error types for the harvester.
//!
//! Every failure in the crawl pipeline is expressed as a `HarvesterError`.
//! Most variants are recoverable: the caller logs them with hierarchy context,
//! counts them in the failure ledger and moves on to the next sibling. Only
//! [`HarvesterError::is_worker_fatal`] variants abort a worker's subtree.

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// All download attempts for an artifact failed.
    #[error("Download of {url} failed after {attempts} attempts: {last_error}")]
    DownloadFailure {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Artifact exceeds the configured size limit.
    #[error("Response from {url} exceeds maximum size of {max_bytes} bytes")]
    ResponseTooLarge { url: String, max_bytes: u64 },

    /// Rendering collaborator returned an error for a page.
    #[error("Rendering {url} failed: {message}")]
    Render { url: String, message: String },

    /// Ready marker did not appear before the timeout elapsed.
    #[error("Timed out after {timeout_ms} ms waiting for '{selector}' on {url}")]
    RenderTimeout {
        url: String,
        selector: String,
        timeout_ms: u128,
    },

    /// Rendering session cannot be (re)established.
    #[error("Rendering session unavailable: {0}")]
    SessionUnavailable(String),

    /// CSS selector in a level signature does not parse.
    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// URL could not be parsed or joined.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// PDF could not be decoded.
    #[error("PDF decoding failed: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Image could not be decoded or encoded.
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    /// External OCR or rasterizer process failed.
    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// Required external tool is not installed.
    #[error("Required tool '{0}' not found on PATH")]
    ToolUnavailable(String),

    /// Configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Run-level cancellation was requested.
    #[error("Crawl cancelled")]
    Cancelled,
}

impl HarvesterError {
    /// Whether this error must abort the current worker's remaining subtree.
    ///
    /// Everything else is a recoverable skip of a single node.
    #[must_use]
    pub fn is_worker_fatal(&self) -> bool {
        matches!(self, Self::SessionUnavailable(_) | Self::Cancelled)
    }

    /// Whether this error came from the rendering collaborator for one page.
    #[must_use]
    pub fn is_render_failure(&self) -> bool {
        matches!(self, Self::Render { .. } | Self::RenderTimeout { .. })
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;
