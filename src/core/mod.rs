pub mod db;
pub mod stats;

pub use db::{DetectionEvent, EventStore};
pub use stats::{StatsAggregator, StatsPoint};
