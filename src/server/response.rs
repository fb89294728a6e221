use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{Error, Result as StoreResult};

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Extension trait for converting store results to API errors.
pub trait StoreResultExt<T> {
    /// `not_found` is the message used when the addressed entity is missing.
    fn api_err(self, not_found: &'static str) -> Result<T, ApiError>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn api_err(self, not_found: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| match e {
            Error::NotFound => ApiError::not_found(not_found),
            Error::Validation(message) => ApiError::bad_request(message),
            Error::ConstraintViolation(message) => ApiError::conflict(message),
            e => {
                tracing::error!("Storage failure: {e}");
                ApiError::internal("Storage failure")
            }
        })
    }
}

/// Runs a store-bound call on the blocking pool so the runtime keeps serving.
pub async fn blocking<T, F>(work: F) -> Result<StoreResult<T>, ApiError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        tracing::error!("Blocking task failed: {e}");
        ApiError::internal("Request worker failed")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let not_found: StoreResult<()> = Err(Error::NotFound);
        let err = not_found.api_err("Analysis not found").unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Analysis not found");

        let invalid: StoreResult<()> = Err(Error::Validation("status cannot be empty".into()));
        let err = invalid.api_err("Analysis not found").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "status cannot be empty");

        let storage: StoreResult<()> = Err(Error::Storage("disk gone".into()));
        let err = storage.api_err("Analysis not found").unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Storage failure");
    }
}
