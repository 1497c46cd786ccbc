pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod server;
pub mod service;

pub use config::Settings;
pub use core::{DetectionEvent, EventStore, StatsAggregator, StatsPoint};
pub use detection::model::{InferenceBackend, ModelHandle};
pub use detection::{BoxOrder, Detector};
pub use error::{ConfigError, DetectError, ModelLoadError, PersistenceError, ServiceError};
pub use models::{BoundingBox, Candidate, DetectionResult};
pub use service::{Analysis, ShelfService};
