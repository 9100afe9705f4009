use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Corrupt log for session {session_id} at line {line}: {message}")]
    CorruptLog {
        session_id: Uuid,
        line: usize,
        message: String,
    },

    #[error("Snapshot and log disagree for session {session_id}: {message}")]
    CorruptState { session_id: Uuid, message: String },
}

pub type Result<T> = std::result::Result<T, DbError>;
