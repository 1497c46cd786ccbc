mod state;
mod util;

use std::path::Path;
use std::sync::Arc;

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use state::StoreState;
use time::OffsetDateTime;

use crate::error::PersistenceError;

/// One stored detection. Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub id: i64,
    pub timestamp: OffsetDateTime,
    pub count: u32,
    pub source_ref: String,
}

/// Append-only log of detection events backed by SQLite.
///
/// Cloning is cheap; clones share the pool and the writer lock.
#[derive(Debug, Clone)]
pub struct EventStore {
    state: Arc<StoreState>,
}

impl EventStore {
    pub async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self, PersistenceError> {
        Ok(Self {
            state: Arc::new(StoreState::open(db_file).await?),
        })
    }

    pub fn db_file(&self) -> &Path {
        self.state.db_file()
    }

    /// Record a detection that happened now.
    pub async fn append(&self, count: u32, source_ref: &str) -> Result<DetectionEvent, PersistenceError> {
        self.append_at(OffsetDateTime::now_utc(), count, source_ref).await
    }

    /// Record a detection with an explicit timestamp.
    ///
    /// A single INSERT inside a transaction: the row is either fully visible
    /// to readers or not at all.
    pub async fn append_at(
        &self,
        timestamp: OffsetDateTime,
        count: u32,
        source_ref: &str,
    ) -> Result<DetectionEvent, PersistenceError> {
        let stored_ts = util::format_timestamp(timestamp)?;

        let _writer = self.state.write_lock().await;
        let mut tx = self.state.pool().begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO bookshelf_stats (timestamp, book_count, image_path) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&stored_ts)
        .bind(i64::from(count))
        .bind(source_ref)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(id, count, source_ref, "Detection event recorded");

        Ok(DetectionEvent {
            id,
            timestamp: util::parse_timestamp(&stored_ts)?,
            count,
            source_ref: source_ref.to_string(),
        })
    }

    /// Events with `since <= timestamp <= until`, oldest first.
    pub async fn query_range(
        &self,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<Vec<DetectionEvent>, PersistenceError> {
        if since > until {
            return Ok(Vec::new());
        }
        let since = util::format_timestamp(since)?;
        let until = util::format_timestamp(until)?;

        sqlx::query(
            r#"SELECT id, timestamp, book_count, image_path FROM bookshelf_stats
            WHERE timestamp >= $1 AND timestamp <= $2
            ORDER BY timestamp ASC, id ASC"#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(self.state.pool())
        .await?
        .iter()
        .map(event_from_row)
        .collect()
    }

    /// Most recently inserted event, if any.
    pub async fn latest(&self) -> Result<Option<DetectionEvent>, PersistenceError> {
        sqlx::query(
            "SELECT id, timestamp, book_count, image_path FROM bookshelf_stats ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(self.state.pool())
        .await?
        .as_ref()
        .map(event_from_row)
        .transpose()
    }

    pub async fn count(&self) -> Result<u64, PersistenceError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookshelf_stats")
            .fetch_one(self.state.pool())
            .await?;
        Ok(n as u64)
    }

    /// Close the pool. Further calls fail.
    pub async fn close(&self) {
        self.state.close().await;
    }
}

fn event_from_row(row: &SqliteRow) -> Result<DetectionEvent, PersistenceError> {
    let id: i64 = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let count: i64 = row.try_get("book_count")?;
    let count = u32::try_from(count).map_err(|_| PersistenceError::CorruptRow {
        id,
        message: format!("book_count {count} out of range"),
    })?;
    Ok(DetectionEvent {
        id,
        timestamp: util::parse_timestamp(&timestamp)?,
        count,
        source_ref: row.try_get("image_path")?,
    })
}
