use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown worker slot: {0}")]
    UnknownSlot(String),

    #[error("Invalid log sequence: {0}")]
    InvalidLog(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::UnknownSlot("worker_9".to_string());
        assert!(error.to_string().contains("worker_9"));
    }
}
