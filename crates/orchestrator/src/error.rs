use council_core::CoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("A run is already in flight for session {0}")]
    ConcurrencyConflict(Uuid),

    #[error("Generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Corrupt session state: {0}")]
    CorruptState(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Persona not found: {0}")]
    PersonaNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session {0} was ended")]
    Aborted(Uuid),
}

impl OrchestratorError {
    /// Stable machine-readable code carried by error events and responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::UpstreamGeneration(_) => "upstream_generation_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::CorruptState(_) => "corrupt_state",
            Self::InvalidState(_) => "invalid_state",
            Self::PersonaNotFound(_) => "persona_not_found",
            Self::Storage(_) => "storage_error",
            Self::Aborted(_) => "session_aborted",
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

impl From<db::DbError> for OrchestratorError {
    fn from(err: db::DbError) -> Self {
        match err {
            db::DbError::SessionNotFound(id) => Self::SessionNotFound(id),
            db::DbError::CorruptLog { .. } | db::DbError::CorruptState { .. } => {
                Self::CorruptState(err.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration(msg) => Self::Configuration(msg),
            CoreError::InvalidLog(msg) => Self::CorruptState(msg),
            CoreError::UnknownSlot(slot) => Self::InvalidState(format!("unknown slot {}", slot)),
            CoreError::Validation(msg) => Self::InvalidState(msg),
        }
    }
}

impl From<GatewayError> for OrchestratorError {
    fn from(err: GatewayError) -> Self {
        Self::UpstreamGeneration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
