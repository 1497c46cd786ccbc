use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::PersistenceError;

const MAX_CONNECTIONS: u32 = 5;

/// Connection pool plus the single-writer lock shared by every clone of the store.
pub(super) struct StoreState {
    db_file: PathBuf,
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("db_file", &self.db_file)
            .finish()
    }
}

impl StoreState {
    /// Open (creating if missing) the database file and bring the schema up
    /// to date. Safe to call against an existing database.
    pub(super) async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self, PersistenceError> {
        let db_file = db_file.as_ref().to_path_buf();
        if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::Database(sqlx::Error::Io(e)))?;
        }

        // WAL lets readers run while a write is in progress; they see the
        // last committed state.
        let connect_opts = SqliteConnectOptions::new()
            .filename(&db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect_opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(db_file = %db_file.display(), "Event store opened");

        Ok(Self {
            db_file,
            pool,
            writer: Mutex::new(()),
        })
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Held for the duration of one append.
    pub(super) async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub(super) fn db_file(&self) -> &Path {
        &self.db_file
    }

    pub(super) async fn close(&self) {
        self.pool.close().await;
    }
}
