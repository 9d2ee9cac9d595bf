use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job store I/O failed at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Duplicate job id: {0}")]
    DuplicateJob(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed (exit_code={exit_code:?}): {stderr}")]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("canceled")]
    Canceled,

    #[error("{0}")]
    Handler(String),
}

impl EngineError {
    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Store {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_carries_stderr() {
        let err = EngineError::CommandFailed {
            exit_code: Some(2),
            stderr: "no such service".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command failed (exit_code=Some(2)): no such service"
        );
    }

    #[test]
    fn timeout_message_shows_duration() {
        let err = EngineError::Timeout(Duration::from_millis(300));
        assert_eq!(err.to_string(), "timed out after 300ms");
        let err = EngineError::Timeout(Duration::from_secs(900));
        assert_eq!(err.to_string(), "timed out after 900s");
    }

    #[test]
    fn invalid_payload_is_bare_message() {
        let err = EngineError::InvalidPayload("missing build action".to_string());
        assert_eq!(err.to_string(), "missing build action");
    }
}
