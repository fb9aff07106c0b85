//! Error types for the mirror and stats pipelines.
//!
//! All fallible operations in this crate return [`MirrorError`]. The variants
//! follow the run-level fault taxonomy: transport faults are retried at the
//! fetch layer and become fatal once retries are exhausted, invariant
//! violations and tile-tool failures abort a run before anything is written,
//! and storage faults surface from the publish step. Malformed upstream
//! records are deliberately *not* errors; they are reported as
//! [`SkippedRecord`](crate::catalog::SkippedRecord) values.

use thiserror::Error;

/// The main error type for the mirror crate.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Upstream fetch failed and retries are exhausted.
    #[error("Transport error from {source_name} after {attempts} attempt(s): {message}")]
    Transport {
        /// Name of the upstream that failed (e.g. "oam-api")
        source_name: String,
        /// Detailed error message
        message: String,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// A run-level invariant was violated; the run must abort before writing.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The external tile builder failed.
    #[error("Tile build failed: {message}")]
    TileBuild {
        /// Detailed error message, usually the tool's stderr
        message: String,
    },

    /// Error from blob storage operations.
    #[error("Storage {operation} failed for '{key}': {message}")]
    Storage {
        /// Operation that failed ("get" or "put")
        operation: &'static str,
        /// Object key involved
        key: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from the secondary data source used for statistics.
    #[error("Data source error: {message}")]
    DataSource {
        /// Type of data source (e.g., "PostgreSQL", "SQL")
        source_type: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, MirrorError>`.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Creates a new transport error.
    pub fn transport(
        source_name: impl Into<String>,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::Transport {
            source_name: source_name.into(),
            message: message.into(),
            attempts,
        }
    }

    /// Creates a storage error without an underlying source.
    pub fn storage(operation: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error wrapping the underlying cause.
    pub fn storage_with_source(
        operation: &'static str,
        key: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a new data source error.
    pub fn data_source(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new tile build error.
    pub fn tile_build(message: impl Into<String>) -> Self {
        Self::TileBuild {
            message: message.into(),
        }
    }

    /// Returns true if the run aborted before any artifact could be written.
    ///
    /// Everything except storage faults is raised ahead of the publish step.
    pub fn is_pre_publish(&self) -> bool {
        !matches!(self, Self::Storage { .. })
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<MirrorError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            MirrorError::Internal(inner) => MirrorError::Internal(format!("{msg}: {inner}")),
            other => MirrorError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                MirrorError::Internal(inner) => MirrorError::Internal(format!("{msg}: {inner}")),
                other => MirrorError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
