use crate::errors::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend command failed: {command}: {message}")]
    Rpc { command: String, message: String },

    #[error("Session '{name}' is gone")]
    SessionGone { name: String },

    #[error("Invalid session name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

impl CoreError for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            BackendError::Rpc { .. } => "BACKEND_RPC",
            BackendError::SessionGone { .. } => "SESSION_GONE",
            BackendError::InvalidName { .. } => "BACKEND_INVALID_NAME",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BackendError::SessionGone {
            name: "mp-a-1".to_string(),
        };
        assert_eq!(err.error_code(), "SESSION_GONE");
        assert_eq!(err.to_string(), "Session 'mp-a-1' is gone");
    }
}
