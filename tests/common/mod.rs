#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from shelfscan for tests
pub use shelfscan::{
    BoundingBox, DetectError, DetectionEvent, DetectionResult, Detector, EventStore, ServiceError,
    ShelfService, StatsAggregator, StatsPoint,
};
