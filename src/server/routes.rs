use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use super::error::ApiError;
use crate::core::stats::DEFAULT_WINDOW_DAYS;
use crate::service::ShelfService;

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub status: &'static str,
    pub count: usize,
    pub boxes: Vec<[u32; 4]>,
    pub image_with_boxes: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub status: &'static str,
    pub timestamps: Vec<String>,
    pub counts: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Accepts one image upload, runs detection and records the event.
pub async fn detect(
    State(service): State<ShelfService>,
    mut multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| ApiError::BadRequest("No image file in request".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }

    let analysis = service.analyze_upload(file_name.as_deref(), &bytes).await?;
    let result = analysis.result;
    Ok(Json(DetectResponse {
        status: "success",
        count: result.count,
        boxes: result.box_arrays(),
        image_with_boxes: result.annotated_image,
    }))
}

/// Per-event counts over the trailing window, oldest first.
pub async fn stats(
    State(service): State<ShelfService>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<StatsResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let points = service.stats().window_stats(days).await?;

    let mut timestamps = Vec::with_capacity(points.len());
    let mut counts = Vec::with_capacity(points.len());
    for point in points {
        // Rfc3339 formatting only fails for out-of-range years
        timestamps.push(
            point
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| point.timestamp.to_string()),
        );
        counts.push(point.count);
    }

    Ok(Json(StatsResponse {
        status: "success",
        timestamps,
        counts,
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Service is running",
    })
}
