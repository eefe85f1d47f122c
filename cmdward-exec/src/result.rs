use serde::{Deserialize, Serialize};

use crate::error::{ExecError, FailureKind};

/// Outcome of one supervised command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    /// At least one stream hit the output cap.
    pub truncated: bool,
    /// Stopped by cancellation or supervisor shutdown.
    pub terminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Result for a command that never produced output of its own.
    pub fn from_error(err: &ExecError) -> Self {
        let kind = err.kind();
        Self {
            stdout: String::new(),
            stderr: err.to_string(),
            exit_code: err.exit_code(),
            timed_out: kind == FailureKind::Timeout,
            truncated: false,
            terminated: kind == FailureKind::Terminated,
            failure: Some(kind),
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.failure.is_none() && self.exit_code == 0
    }

    pub(crate) fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
