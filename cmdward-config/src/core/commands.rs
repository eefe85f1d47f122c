use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::commands as command_constants;

/// Command policy configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandsConfig {
    /// Program basenames that may be spawned
    #[serde(default = "default_allow_list")]
    pub allow_list: Vec<String>,

    /// Program basenames that are always refused, even when also allowed
    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,

    /// Names routed to the interactive front end instead of spawned
    #[serde(default = "default_builtins")]
    pub builtins: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            allow_list: default_allow_list(),
            deny_list: default_deny_list(),
            builtins: default_builtins(),
        }
    }
}

impl CommandsConfig {
    pub fn validate(&self) -> Result<()> {
        for (section, names) in [
            ("commands.allow_list", &self.allow_list),
            ("commands.deny_list", &self.deny_list),
            ("commands.builtins", &self.builtins),
        ] {
            for name in names {
                ensure!(
                    !name.trim().is_empty(),
                    "{section} must not contain empty entries"
                );
                ensure!(
                    !name.trim().contains(char::is_whitespace),
                    "{section} entry `{name}` must be a single program name"
                );
            }
        }
        Ok(())
    }
}

fn default_allow_list() -> Vec<String> {
    to_owned_list(command_constants::DEFAULT_ALLOW_LIST)
}

fn default_deny_list() -> Vec<String> {
    to_owned_list(command_constants::DEFAULT_DENY_LIST)
}

fn default_builtins() -> Vec<String> {
    to_owned_list(command_constants::DEFAULT_BUILTINS)
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).into()).collect()
}
