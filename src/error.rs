use std::path::PathBuf;
use std::time::Duration;

/// Result type for loopscan engine operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Failures reported by the media decode/transcode service
#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("{tool} timed out after {:.0}s", .after.as_secs_f64())]
    Timeout { tool: &'static str, after: Duration },

    #[error("{tool} failed: {message}")]
    Failed { tool: &'static str, message: String },

    #[error("could not parse {tool} output: {message}")]
    Parse { tool: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error types for scanning, selection and cache operations
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("source unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: MediaError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("cannot compare {left} features with {right} features")]
    IncompatibleFeatures {
        left: &'static str,
        right: &'static str,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub fn unreadable(path: impl Into<PathBuf>, source: MediaError) -> Self {
        ScanError::SourceUnreadable {
            path: path.into(),
            source,
        }
    }

    /// Whether the error only affects the source being scanned
    pub fn is_per_source(&self) -> bool {
        matches!(self, ScanError::SourceUnreadable { .. } | ScanError::Media(_))
    }
}
