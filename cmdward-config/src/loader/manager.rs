use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::constants::defaults;
use crate::loader::config::CmdwardConfig;
use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};

/// Where the system and user layers are looked up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPaths {
    pub system: Option<PathBuf>,
    pub user: Vec<PathBuf>,
}

impl ConfigPaths {
    /// Standard locations for the current platform and user.
    pub fn discover() -> Self {
        let system = if cfg!(unix) {
            Some(PathBuf::from(defaults::SYSTEM_CONFIG_PATH))
        } else {
            None
        };
        let user = dirs::home_dir()
            .map(|home| {
                vec![
                    home.join(defaults::USER_CONFIG_DIR)
                        .join(defaults::CONFIG_FILE_NAME),
                ]
            })
            .unwrap_or_default();
        Self { system, user }
    }

    /// No system or user layers; only workspace/explicit files apply.
    pub fn isolated() -> Self {
        Self::default()
    }
}

/// Configuration manager for loading and validating configurations
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub(crate) config: CmdwardConfig,
    config_path: Option<PathBuf>,
    workspace_root: Option<PathBuf>,
    pub(crate) layer_stack: ConfigLayerStack,
}

impl ConfigManager {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        if let Ok(config_path) = std::env::var(defaults::CONFIG_PATH_ENV) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_file(trimmed).with_context(|| {
                    format!(
                        "Failed to load configuration from {}={}",
                        defaults::CONFIG_PATH_ENV,
                        trimmed
                    )
                });
            }
        }

        if let Ok(workspace_path) = std::env::var(defaults::WORKSPACE_ENV) {
            let trimmed = workspace_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_workspace(trimmed).with_context(|| {
                    format!(
                        "Failed to load configuration from {}={}",
                        defaults::WORKSPACE_ENV,
                        trimmed
                    )
                });
            }
        }

        Self::load_from_workspace(std::env::current_dir()?)
    }

    /// Load configuration for a workspace using the standard system/user paths
    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_workspace_with_paths(workspace, &ConfigPaths::discover())
    }

    pub fn load_from_workspace_with_paths(
        workspace: impl AsRef<Path>,
        paths: &ConfigPaths,
    ) -> Result<Self> {
        let workspace_root = workspace.as_ref().to_path_buf();
        let mut layer_stack = Self::base_layers(paths);

        let workspace_config_path = workspace_root.join(defaults::CONFIG_FILE_NAME);
        if workspace_config_path.exists() {
            let toml = Self::load_toml_from_file(&workspace_config_path)?;
            layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::Workspace {
                    file: workspace_config_path,
                },
                toml,
            ));
        }

        let config = Self::resolve(&layer_stack)?;
        let config_path = layer_stack.last_file().map(Path::to_path_buf);

        Ok(Self {
            config,
            config_path,
            workspace_root: Some(workspace_root),
            layer_stack,
        })
    }

    /// Load configuration from a specific file on top of the system/user layers
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_file_with_paths(path, &ConfigPaths::discover())
    }

    pub fn load_from_file_with_paths(path: impl AsRef<Path>, paths: &ConfigPaths) -> Result<Self> {
        let path = path.as_ref();
        let mut layer_stack = Self::base_layers(paths);

        let toml = Self::load_toml_from_file(path)?;
        layer_stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Explicit {
                file: path.to_path_buf(),
            },
            toml,
        ));

        let config = Self::resolve(&layer_stack)
            .with_context(|| format!("Failed to apply config file: {}", path.display()))?;

        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
            workspace_root: path.parent().map(Path::to_path_buf),
            layer_stack,
        })
    }

    // Broken system/user files are skipped so one bad dotfile cannot lock a
    // user out; workspace and explicit files fail loudly instead.
    fn base_layers(paths: &ConfigPaths) -> ConfigLayerStack {
        let mut layer_stack = ConfigLayerStack::default();

        if let Some(system_config) = &paths.system
            && system_config.exists()
        {
            match Self::load_toml_from_file(system_config) {
                Ok(toml) => layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::System {
                        file: system_config.clone(),
                    },
                    toml,
                )),
                Err(err) => warn!("Ignoring system config: {err:#}"),
            }
        }

        for user_config in &paths.user {
            if !user_config.exists() {
                continue;
            }
            match Self::load_toml_from_file(user_config) {
                Ok(toml) => layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::User {
                        file: user_config.clone(),
                    },
                    toml,
                )),
                Err(err) => warn!("Ignoring user config: {err:#}"),
            }
        }

        layer_stack
    }

    pub(crate) fn resolve(layer_stack: &ConfigLayerStack) -> Result<CmdwardConfig> {
        let config = if layer_stack.layers().is_empty() {
            CmdwardConfig::default()
        } else {
            layer_stack
                .effective_config()
                .try_into()
                .context("Failed to deserialize effective configuration")?
        };

        config
            .validate()
            .context("Configuration failed validation")?;
        Ok(config)
    }

    fn load_toml_from_file(path: &Path) -> Result<toml::Value> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(value)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CmdwardConfig {
        &self.config
    }

    pub fn into_config(self) -> CmdwardConfig {
        self.config
    }

    /// Highest-precedence file that contributed to the configuration
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn layer_stack(&self) -> &ConfigLayerStack {
        &self.layer_stack
    }

    /// Get the effective TOML configuration
    pub fn effective_config(&self) -> toml::Value {
        self.layer_stack.effective_config()
    }
}
