use time::{Duration, OffsetDateTime};

use crate::core::db::EventStore;
use crate::error::PersistenceError;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
/// Longer windows are clamped; they already reach past any stored event.
const MAX_WINDOW_DAYS: i64 = 1_000_000;

/// One point of a stats window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsPoint {
    pub timestamp: OffsetDateTime,
    pub count: u32,
}

/// Trailing-window view over an [`EventStore`]. No bucketing: every stored
/// event in the window comes back as its own point.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    store: EventStore,
}

impl StatsAggregator {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub async fn window_stats(&self, days: i64) -> Result<Vec<StatsPoint>, PersistenceError> {
        self.window_stats_at(days, OffsetDateTime::now_utc()).await
    }

    /// Events in `[now - days, now]`, oldest first. A non-positive window is empty.
    pub async fn window_stats_at(
        &self,
        days: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<StatsPoint>, PersistenceError> {
        if days <= 0 {
            return Ok(Vec::new());
        }
        let since = now.checked_sub(Duration::days(days.min(MAX_WINDOW_DAYS))).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Ok(self
            .store
            .query_range(since, now)
            .await?
            .into_iter()
            .map(|e| StatsPoint {
                timestamp: e.timestamp,
                count: e.count,
            })
            .collect())
    }
}
