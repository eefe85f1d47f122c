use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::output::{DEFAULT_MAX_OUTPUT_BYTES, MIN_MAX_OUTPUT_BYTES};

/// Limits applied to captured stdout/stderr
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Maximum bytes kept per stream after trimming; longer output is cut and marked
    #[serde(default = "OutputConfig::default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_bytes: Self::default_max_bytes(),
        }
    }
}

impl OutputConfig {
    const fn default_max_bytes() -> usize {
        DEFAULT_MAX_OUTPUT_BYTES
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_bytes >= MIN_MAX_OUTPUT_BYTES,
            "output.max_bytes must be at least {MIN_MAX_OUTPUT_BYTES}"
        );
        Ok(())
    }
}
