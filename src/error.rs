//! Error types for the detection, persistence and service layers.
//!
//! Each operation returns its own error type so callers can tell bad input
//! (a missing or undecodable image) apart from infrastructure failures.

use std::path::PathBuf;
use std::time::Duration;

/// Failure to bring the inference model up. Fatal to the hosting process.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to load model {}: {message}", path.display())]
    Runtime { path: PathBuf, message: String },

    #[error("Invalid labels file {}: {message}", path.display())]
    Labels { path: PathBuf, message: String },

    #[error("Target class '{0}' is not one of the model's labels")]
    UnknownTargetClass(String),
}

/// Failure of a single `detect` call. Never affects other calls.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Failed to encode annotated image: {0}")]
    Encoding(String),
}

impl DetectError {
    /// True when the failure was caused by the supplied image rather than
    /// by the model or the encoder.
    pub fn is_input_error(&self) -> bool {
        matches!(self, DetectError::ImageNotFound(_) | DetectError::ImageDecode(_))
    }
}

/// Failure of a single append or query against the event store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    #[error("Corrupt row {id}: {message}")]
    CorruptRow { id: i64, message: String },
}

/// Errors surfaced by [`crate::service::ShelfService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Detection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to store upload: {0}")]
    Upload(#[from] std::io::Error),

    #[error("Detection worker failed: {0}")]
    Worker(String),
}

impl ServiceError {
    pub fn is_input_error(&self) -> bool {
        match self {
            ServiceError::Detect(e) => e.is_input_error(),
            _ => false,
        }
    }
}

/// Errors building [`crate::config::Settings`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
