use crate::backend::errors::BackendError;
use crate::errors::{ConfigError, CoreError};
use crate::term::errors::PtyError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot {operation}: {reason}")]
    Policy {
        operation: &'static str,
        reason: String,
    },

    #[error("Tab {id} not found")]
    TabNotFound { id: String },

    #[error("Lifecycle command failed: {message}")]
    Internal { message: String },
}

impl CoreError for LifecycleError {
    fn error_code(&self) -> &'static str {
        match self {
            LifecycleError::Backend(e) => e.error_code(),
            LifecycleError::Pty(e) => e.error_code(),
            LifecycleError::Config(e) => e.error_code(),
            LifecycleError::Policy { .. } => "LIFECYCLE_POLICY",
            LifecycleError::TabNotFound { .. } => "TAB_NOT_FOUND",
            LifecycleError::Internal { .. } => "LIFECYCLE_INTERNAL",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            LifecycleError::Policy { .. } | LifecycleError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_is_user_error() {
        let err = LifecycleError::Policy {
            operation: "detach",
            reason: "viewer tabs have no session".to_string(),
        };
        assert!(err.is_user_error());
        assert_eq!(err.error_code(), "LIFECYCLE_POLICY");
        assert_eq!(
            err.to_string(),
            "Cannot detach: viewer tabs have no session"
        );
    }

    #[test]
    fn test_nested_codes_pass_through() {
        let err: LifecycleError = BackendError::SessionGone {
            name: "s".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "SESSION_GONE");
    }
}
