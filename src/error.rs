//! Centralized error types for cluster-alertd using thiserror.
//!
//! Errors never cross the poll loop or the ingestion boundary: they are
//! contained in the handler or job that raised them and surface through
//! notifications and logs.

use std::time::Duration;

use thiserror::Error;

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid regex pattern in '{field}': {message}")]
    InvalidRegex { field: String, message: String },
    #[error("invalid credential '{field}': {message}")]
    InvalidCredential { field: String, message: String },
}

/// Errors related to notification delivery.
///
/// `RecipientNotFound` and `ConnectionClosed` are distinct so callers can
/// tell an unknown device from one that has just dropped off.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("recipient '{0}' not found")]
    RecipientNotFound(String),
    #[error("connection to recipient '{0}' is closed")]
    ConnectionClosed(String),
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("max retries exceeded")]
    MaxRetriesExceeded,
}

/// Errors raised while building or executing an analysis job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("inconclusive result: {0}")]
    Inconclusive(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(#[from] ConfigError),
    #[error("missing context: {0}")]
    MissingContext(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::LoadError("file not found".to_string());
        assert_eq!(
            err.to_string(),
            "failed to load config file: file not found"
        );

        let err = ConfigError::ValidationError("missing field".to_string());
        assert_eq!(err.to_string(), "invalid configuration: missing field");
    }

    #[test]
    fn config_error_invalid_regex_display() {
        let err = ConfigError::InvalidRegex {
            field: "entity.patterns[1]".to_string(),
            message: "unclosed group".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid regex pattern in 'entity.patterns[1]': unclosed group"
        );
    }

    #[test]
    fn config_error_invalid_credential_display() {
        let err = ConfigError::InvalidCredential {
            field: "agent.api_key".to_string(),
            message: "looks like a placeholder".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid credential 'agent.api_key': looks like a placeholder"
        );
    }

    #[test]
    fn notify_error_variants_are_distinguishable() {
        let missing = NotifyError::RecipientNotFound("dev-1".to_string());
        let closed = NotifyError::ConnectionClosed("dev-1".to_string());

        assert_eq!(missing.to_string(), "recipient 'dev-1' not found");
        assert_eq!(closed.to_string(), "connection to recipient 'dev-1' is closed");
        assert!(matches!(missing, NotifyError::RecipientNotFound(_)));
        assert!(matches!(closed, NotifyError::ConnectionClosed(_)));

        assert_eq!(NotifyError::MaxRetriesExceeded.to_string(), "max retries exceeded");
    }

    #[test]
    fn job_error_display() {
        let err = JobError::Timeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "attempt timed out after 120s");

        let err = JobError::Execution("agent returned 502".to_string());
        assert_eq!(err.to_string(), "execution failed: agent returned 502");

        let err = JobError::from(ConfigError::InvalidCredential {
            field: "agent.model".to_string(),
            message: "must not be empty".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "invalid credentials: invalid credential 'agent.model': must not be empty"
        );
    }
}
