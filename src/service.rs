//! Ties a [`Detector`] to an [`EventStore`]: bounded, time-limited detection
//! followed by recording the event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::core::{DetectionEvent, EventStore, StatsAggregator};
use crate::detection::{self, Detector};
use crate::error::{DetectError, ServiceError};
use crate::models::DetectionResult;

/// Result of one analysed photo.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: DetectionResult,
    pub event: DetectionEvent,
}

#[derive(Debug, Clone)]
pub struct ShelfService {
    detector: Arc<Detector>,
    store: EventStore,
    stats: StatsAggregator,
    permits: Arc<Semaphore>,
    timeout: Duration,
    uploads_dir: PathBuf,
}

impl ShelfService {
    pub fn new(
        detector: Arc<Detector>,
        store: EventStore,
        workers: usize,
        timeout: Duration,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detector,
            stats: StatsAggregator::new(store.clone()),
            store,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Run detection only, bounded by the worker pool and the timeout.
    ///
    /// On timeout the blocking task is left to finish on its own and its
    /// output is dropped; no event is recorded.
    pub async fn detect(&self, image_path: &Path) -> Result<DetectionResult, ServiceError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))?;

        let detector = self.detector.clone();
        let path = image_path.to_path_buf();
        // the permit travels with the task so a timed-out detection still
        // counts against the pool until it really finishes
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect(&path)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) => Err(ServiceError::Worker(join_err.to_string())),
            Err(_) => {
                tracing::warn!(
                    path = %image_path.display(),
                    timeout = ?self.timeout,
                    "Detection timed out"
                );
                Err(ServiceError::Timeout(self.timeout))
            }
        }
    }

    /// Detect, then record the event. Nothing is recorded if detection fails.
    pub async fn analyze(&self, image_path: &Path) -> Result<Analysis, ServiceError> {
        let result = self.detect(image_path).await?;
        let count = u32::try_from(result.count)
            .map_err(|_| DetectError::Inference(format!("implausible count {}", result.count)))?;
        let event = self
            .store
            .append(count, &detection::source_ref(image_path))
            .await?;

        tracing::info!(
            event_id = event.id,
            count = result.count,
            source = %event.source_ref,
            "Bookshelf analysed"
        );
        Ok(Analysis { result, event })
    }

    /// Store an upload, then analyse it. A failed analysis removes the stored
    /// file again so every kept upload is referenced by an event.
    pub async fn analyze_upload(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<Analysis, ServiceError> {
        let path = self.store_upload(original_name, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Upload stored");

        match self.analyze(&path).await {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %rm, "Failed to remove rejected upload");
                }
                Err(e)
            }
        }
    }

    /// Persist uploaded bytes under the uploads directory with a fresh name
    /// that keeps the original extension.
    pub async fn store_upload(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<PathBuf, ServiceError> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let fname = upload_file_name(original_name);
        let dest = self.uploads_dir.join(fname);
        tokio::fs::write(&dest, bytes).await?;
        Ok(dest)
    }
}

fn upload_file_name(original_name: Option<&str>) -> String {
    let ext = original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}
