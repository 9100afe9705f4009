use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator::OrchestratorError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Engine(OrchestratorError),
    Database(db::DbError),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub error: String,
    pub message: String,
}

impl AppError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Engine(err) => {
                let status = match &err {
                    OrchestratorError::Configuration(_) | OrchestratorError::InvalidState(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    OrchestratorError::SessionNotFound(_)
                    | OrchestratorError::PersonaNotFound(_) => StatusCode::NOT_FOUND,
                    OrchestratorError::ConcurrencyConflict(_) | OrchestratorError::Aborted(_) => {
                        StatusCode::CONFLICT
                    }
                    OrchestratorError::CorruptState(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    OrchestratorError::UpstreamGeneration(_) => StatusCode::BAD_GATEWAY,
                    OrchestratorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(code = err.code(), "Request failed: {}", err);
                }
                (status, err.code(), err.to_string())
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Database error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError::Engine(err)
    }
}

impl From<db::DbError> for AppError {
    fn from(err: db::DbError) -> Self {
        AppError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                OrchestratorError::Configuration("worker_count".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::SessionNotFound(Uuid::new_v4()),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::ConcurrencyConflict(Uuid::new_v4()),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::CorruptState("stage mismatch".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                OrchestratorError::UpstreamGeneration("timeout".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                OrchestratorError::Storage("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let code = err.code();
            let (status, error, _) = AppError::from(err).parts();
            assert_eq!(status, expected, "{}", code);
            assert_eq!(error, code);
        }
    }
}
