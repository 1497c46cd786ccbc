use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{DetectError, PersistenceError, ServiceError};

/// Error returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request (missing upload, bad multipart body)
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::Detect(e)) => match e {
                DetectError::ImageNotFound(_) => StatusCode::NOT_FOUND,
                DetectError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                DetectError::Inference(_) | DetectError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Service(ServiceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Service(ServiceError::Worker(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(ServiceError::Persistence(_) | ServiceError::Upload(_))
            | ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, message = %message, "Request failed");
        } else {
            tracing::warn!(status = %status, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "status": "error",
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn client_errors_map_to_4xx() {
        let not_found = ApiError::from(ServiceError::from(DetectError::ImageNotFound(PathBuf::from("a"))));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        let decode = ApiError::from(ServiceError::from(DetectError::ImageDecode("bad".into())));
        assert_eq!(decode.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::BadRequest("no file".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_errors_map_to_5xx() {
        let inference = ApiError::from(ServiceError::from(DetectError::Inference("boom".into())));
        assert_eq!(inference.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let timeout = ApiError::from(ServiceError::Timeout(Duration::from_secs(3)));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        let db = ApiError::from(PersistenceError::Timestamp("x".into()));
        assert!(db.status().is_server_error());
    }
}
