use analytics::AnalyticsError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use database::StoreError;
use jobs::JobError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Job(job) => match job {
                JobError::Config(_) => StatusCode::BAD_REQUEST,
                JobError::NotFound(_) => StatusCode::NOT_FOUND,
                JobError::NotYetAvailable { .. } => StatusCode::CONFLICT,
                JobError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                JobError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
                JobError::Artifacts(AnalyticsError::UnknownArtifact(_) | AnalyticsError::NotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                JobError::Artifacts(AnalyticsError::NoRemote) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed.");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "The run store is unavailable".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
