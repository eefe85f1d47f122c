use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{CommandsConfig, OutputConfig};
use crate::debug::LoggingConfig;
use crate::timeouts::TimeoutsConfig;

/// Effective cmdward configuration after all layers are merged.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CmdwardConfig {
    /// Allow/deny tables and built-in names
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Deadlines and the termination grace period
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Captured output bounds
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CmdwardConfig {
    pub fn validate(&self) -> Result<()> {
        self.commands
            .validate()
            .context("Invalid [commands] configuration")?;
        self.timeouts
            .validate()
            .context("Invalid [timeouts] configuration")?;
        self.output
            .validate()
            .context("Invalid [output] configuration")?;
        Ok(())
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write the configuration to `output`, creating parent directories.
    pub fn write_to_path(&self, output: impl AsRef<Path>) -> Result<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = self.to_toml_string()?;
        fs::write(output, content)
            .with_context(|| format!("Failed to write config file: {}", output.display()))
    }
}
