use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::commands::DEFAULT_COMMAND_TIMEOUTS;
use crate::constants::execution::{
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_TIMEOUT_SECS, MAX_GRACE_PERIOD_MS, MAX_TIMEOUT_SECS,
    MIN_GRACE_PERIOD_MS, MIN_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeoutsConfig {
    /// Deadline (in seconds) for programs without a per-command entry.
    #[serde(default = "TimeoutsConfig::default_default_seconds")]
    pub default_seconds: u64,
    /// Wait (in milliseconds) between the graceful and the forceful signal.
    #[serde(default = "TimeoutsConfig::default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Deadlines (in seconds) keyed by program basename.
    #[serde(default = "TimeoutsConfig::default_per_command")]
    pub per_command: BTreeMap<String, u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_seconds: Self::default_default_seconds(),
            grace_period_ms: Self::default_grace_period_ms(),
            per_command: Self::default_per_command(),
        }
    }
}

impl TimeoutsConfig {
    const fn default_default_seconds() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }

    const fn default_grace_period_ms() -> u64 {
        DEFAULT_GRACE_PERIOD_MS
    }

    fn default_per_command() -> BTreeMap<String, u64> {
        DEFAULT_COMMAND_TIMEOUTS
            .iter()
            .map(|(name, secs)| ((*name).to_string(), *secs))
            .collect()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.default_seconds),
            "timeouts.default_seconds must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}"
        );
        ensure!(
            (MIN_GRACE_PERIOD_MS..=MAX_GRACE_PERIOD_MS).contains(&self.grace_period_ms),
            "timeouts.grace_period_ms must be between {MIN_GRACE_PERIOD_MS} and {MAX_GRACE_PERIOD_MS}"
        );
        for (name, secs) in &self.per_command {
            ensure!(
                (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(secs),
                "timeouts.per_command.{name} must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}"
            );
        }
        Ok(())
    }
}

/// Resolve a user-supplied timeout into a bounded, non-zero value.
pub fn resolve_timeout(user_timeout: Option<u64>) -> u64 {
    match user_timeout {
        None | Some(0) => DEFAULT_TIMEOUT_SECS,
        Some(value) if value < MIN_TIMEOUT_SECS => MIN_TIMEOUT_SECS,
        Some(value) if value > MAX_TIMEOUT_SECS => MAX_TIMEOUT_SECS,
        Some(value) => value,
    }
}
