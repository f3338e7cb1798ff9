use crate::errors::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Failed to open PTY: {message}")]
    Open { message: String },

    #[error("Failed to spawn PTY command: {message}")]
    Spawn { message: String },

    #[error("PTY read failed: {message}")]
    Read { message: String },

    #[error("PTY write failed: {message}")]
    Write { message: String },

    #[error("PTY resize failed: {message}")]
    Resize { message: String },

    #[error("PTY {what} lock poisoned")]
    LockPoisoned { what: &'static str },
}

impl CoreError for PtyError {
    fn error_code(&self) -> &'static str {
        match self {
            PtyError::Open { .. } => "PTY_OPEN",
            PtyError::Spawn { .. } => "PTY_SPAWN",
            PtyError::Read { .. } => "PTY_READER_IO",
            PtyError::Write { .. } => "PTY_INPUT_IO",
            PtyError::Resize { .. } => "PTY_RESIZE",
            PtyError::LockPoisoned { .. } => "PTY_LOCK_POISONED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = PtyError::Write {
            message: "broken pipe".to_string(),
        };
        assert_eq!(err.error_code(), "PTY_INPUT_IO");
        assert_eq!(err.to_string(), "PTY write failed: broken pipe");
    }
}
