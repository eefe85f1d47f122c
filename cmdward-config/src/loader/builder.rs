use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource};
use crate::loader::manager::{ConfigManager, ConfigPaths};

/// Builder for a [`ConfigManager`] with `--set` style runtime overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    workspace: Option<PathBuf>,
    config_file: Option<PathBuf>,
    paths: Option<ConfigPaths>,
    cli_overrides: Vec<(String, toml::Value)>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workspace directory.
    pub fn workspace(mut self, path: PathBuf) -> Self {
        self.workspace = Some(path);
        self
    }

    /// Use a specific configuration file instead of the workspace `cmdward.toml`.
    pub fn config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    /// Replace the discovered system/user locations.
    pub fn paths(mut self, paths: ConfigPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Add an override such as `("timeouts.default_seconds", 10)`.
    pub fn cli_override(mut self, key: String, value: toml::Value) -> Self {
        self.cli_overrides.push((key, value));
        self
    }

    /// Add multiple overrides from string pairs.
    ///
    /// Values are parsed as TOML. If parsing fails, they are treated as strings.
    pub fn cli_overrides(mut self, overrides: &[(String, String)]) -> Self {
        for (key, value) in overrides {
            self.cli_overrides
                .push((key.clone(), parse_override_value(value)));
        }
        self
    }

    pub fn build(self) -> Result<ConfigManager> {
        let paths = self.paths.unwrap_or_else(ConfigPaths::discover);

        let mut manager = match (self.config_file, self.workspace) {
            (Some(config_file), _) => ConfigManager::load_from_file_with_paths(config_file, &paths)?,
            (None, Some(workspace)) => {
                ConfigManager::load_from_workspace_with_paths(workspace, &paths)?
            }
            (None, None) => ConfigManager::load_from_workspace_with_paths(
                std::env::current_dir().context("Failed to resolve current directory")?,
                &paths,
            )?,
        };

        if !self.cli_overrides.is_empty() {
            let mut runtime_toml = toml::Table::new();
            for (key, value) in self.cli_overrides {
                insert_dotted_key(&mut runtime_toml, &key, value)?;
            }

            manager.layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::Runtime,
                toml::Value::Table(runtime_toml),
            ));

            manager.config = ConfigManager::resolve(&manager.layer_stack)
                .context("Configuration failed validation after runtime overrides")?;
        }

        Ok(manager)
    }
}

/// Split `KEY=VALUE` as given to `--set`.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("override `{raw}` must have the form KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("override `{raw}` has an empty key");
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn parse_override_value(value: &str) -> toml::Value {
    // Parse as the right-hand side of an assignment so bare scalars work.
    toml::from_str::<toml::Table>(&format!("value = {value}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()))
}

fn insert_dotted_key(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|part| part.trim().is_empty()) {
        bail!("override key `{key}` contains an empty segment");
    }

    let Some((last, parents)) = parts.split_last() else {
        bail!("override key must not be empty");
    };

    let mut current = table;
    for part in parents {
        let entry = current
            .entry((*part).to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        let Some(next) = entry.as_table_mut() else {
            bail!("override key `{key}` does not address a table");
        };
        current = next;
    }
    current.insert((*last).to_string(), value);
    Ok(())
}
