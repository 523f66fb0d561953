use crate::engine::TreeError;
use crate::orchestration::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The request was well formed but the current state refuses it.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),
    /// Transient; the caller should retry.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MemberNotFound(_) | EngineError::PackageNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            EngineError::MemberExists(_) | EngineError::PackageExists(_) => {
                AppError::Conflict(err.to_string())
            }
            EngineError::UnknownTier(_) | EngineError::InvalidInput(_) => {
                AppError::BadRequest(err.to_string())
            }
            EngineError::InvalidPackageState(e) => {
                AppError::Unprocessable(format!("payment could not be recorded: {}", e))
            }
            EngineError::Tree(TreeError::PlacementUndefined { .. }) => {
                AppError::Unprocessable(err.to_string())
            }
            EngineError::ConcurrentUpdateConflict(_) => {
                AppError::Unavailable("income is still processing, retry shortly".to_string())
            }
            EngineError::Tree(TreeError::CycleDetected(_)) | EngineError::Db(_) => {
                error!(error = %err, "Engine failure");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, MemberId};
    use crate::engine::InstallmentError;

    fn status_of(err: EngineError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let m = MemberId::new("m".to_string());
        assert_eq!(status_of(EngineError::MemberNotFound(m.clone())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::MemberExists(m.clone())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(EngineError::UnknownTier("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(EngineError::InvalidPackageState(InstallmentError::AmountMismatch {
                due: Decimal::from_i64(1000),
                paid: Decimal::from_i64(10),
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(EngineError::ConcurrentUpdateConflict("busy".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(EngineError::Tree(TreeError::PlacementUndefined {
                sponsor: m.clone(),
                referral_number: 3,
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(EngineError::Tree(TreeError::CycleDetected(m))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
