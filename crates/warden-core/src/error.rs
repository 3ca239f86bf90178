use thiserror::Error;

/// Core error types for warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Failed to spawn managed process: {0}")]
    SpawnFailed(String),

    #[error("Process management error: {0}")]
    Process(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionFailed(String),

    #[error("Daemon error {status}: {body}")]
    DaemonStatus { status: u16, body: String },

    #[error("Unexpected daemon reply: {0}")]
    Protocol(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// HTTP status the control plane reports this error with. Internal
    /// failures surface their text under the trusted-localhost assumption.
    pub fn http_status(&self) -> u16 {
        match self {
            WardenError::InvalidRequest(_) => 400,
            WardenError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Whether this error was caused by the caller rather than the daemon
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            WardenError::InvalidRequest(_) | WardenError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WardenError::SpawnFailed("exec failed".to_string());
        let display = format!("{error}");
        assert!(display.contains("Failed to spawn managed process"));

        let error = WardenError::DaemonStatus {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(format!("{error}").contains("Daemon error 500"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(WardenError::InvalidRequest("port required".into()).http_status(), 400);
        assert_eq!(WardenError::NotFound("no such pid".into()).http_status(), 404);
        assert_eq!(WardenError::SpawnFailed("exec".into()).http_status(), 500);
        assert_eq!(WardenError::Process("signal".into()).http_status(), 500);
    }

    #[test]
    fn test_caller_error_categorization() {
        assert!(WardenError::InvalidRequest("x".into()).is_caller_error());
        assert!(WardenError::NotFound("x".into()).is_caller_error());
        assert!(!WardenError::SpawnFailed("x".into()).is_caller_error());
        assert!(!WardenError::ConnectionFailed("x".into()).is_caller_error());
    }
}
