//! Failure taxonomy for supervised commands.
//!
//! Every failure is reported back to callers as an [`ExecutionResult`]
//! carrying a sentinel exit code and a [`FailureKind`] tag, never as a panic.
//!
//! [`ExecutionResult`]: crate::ExecutionResult

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generic failure (policy refusal, empty command, unclassified spawn error).
pub const GENERIC_FAILURE_EXIT_CODE: i32 = 1;
/// The OS refused to execute the program.
pub const PERMISSION_DENIED_EXIT_CODE: i32 = 126;
/// The program could not be located.
pub const NOT_FOUND_EXIT_CODE: i32 = 127;
/// The command outlived its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// The command was cancelled or stopped by shutdown (128 + SIGTERM).
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// Machine-readable failure class attached to an [`ExecutionResult`](crate::ExecutionResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EmptyCommand,
    PolicyDenied,
    BuiltinRequired,
    NotFound,
    PermissionDenied,
    Timeout,
    Terminated,
    SpawnFailure,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("command `{program}` is not allowed by the execution policy")]
    PolicyDenied { program: String },

    #[error("`{program}` is a built-in command and must be handled by the interactive shell")]
    BuiltinRequired { program: String },

    #[error("command not found: {program}")]
    NotFound { program: String },

    #[error("permission denied: {program}")]
    PermissionDenied { program: String },

    #[error("command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("command was terminated before it completed")]
    Terminated,

    #[error("failed to spawn `{program}`: {reason}")]
    SpawnFailure { program: String, reason: String },
}

impl ExecError {
    pub fn timeout(limit: Duration) -> Self {
        let mut seconds = limit.as_secs();
        if limit.subsec_nanos() > 0 {
            seconds += 1;
        }
        Self::Timeout { seconds }
    }

    /// Classify an OS spawn error for `program`.
    pub fn from_spawn_error(program: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
            },
            _ => Self::SpawnFailure {
                program: program.to_string(),
                reason: err.to_string(),
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EmptyCommand => FailureKind::EmptyCommand,
            Self::PolicyDenied { .. } => FailureKind::PolicyDenied,
            Self::BuiltinRequired { .. } => FailureKind::BuiltinRequired,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::PermissionDenied { .. } => FailureKind::PermissionDenied,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Terminated => FailureKind::Terminated,
            Self::SpawnFailure { .. } => FailureKind::SpawnFailure,
        }
    }

    /// Sentinel exit code reported for this failure.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

impl FailureKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::NotFound => NOT_FOUND_EXIT_CODE,
            Self::PermissionDenied => PERMISSION_DENIED_EXIT_CODE,
            Self::Timeout => TIMEOUT_EXIT_CODE,
            Self::Terminated => TERMINATED_EXIT_CODE,
            Self::EmptyCommand
            | Self::PolicyDenied
            | Self::BuiltinRequired
            | Self::SpawnFailure => GENERIC_FAILURE_EXIT_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn spawn_errors_are_classified_by_kind() {
        let not_found = io::Error::from(io::ErrorKind::NotFound);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let other = io::Error::other("fork failed");

        assert_eq!(
            ExecError::from_spawn_error("nope", &not_found).exit_code(),
            127
        );
        assert_eq!(ExecError::from_spawn_error("nope", &denied).exit_code(), 126);
        let generic = ExecError::from_spawn_error("nope", &other);
        assert_eq!(generic.kind(), FailureKind::SpawnFailure);
        assert_eq!(generic.exit_code(), 1);
        assert!(generic.to_string().contains("fork failed"));
    }

    #[test]
    fn timeout_rounds_partial_seconds_up() {
        assert_eq!(
            ExecError::timeout(Duration::from_millis(1500)),
            ExecError::Timeout { seconds: 2 }
        );
        assert_eq!(
            ExecError::timeout(Duration::from_secs(3)).to_string(),
            "command timed out after 3 seconds"
        );
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::PermissionDenied).expect("serialize");
        assert_eq!(json, "\"permission_denied\"");
    }
}
