use crate::loader::merge_toml_values;
use std::path::{Path, PathBuf};
use toml::Value as TomlValue;

/// Source of a configuration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// System-wide configuration (/etc/cmdward/cmdward.toml)
    System { file: PathBuf },
    /// User-specific configuration (~/.cmdward/cmdward.toml)
    User { file: PathBuf },
    /// cmdward.toml in the workspace root
    Workspace { file: PathBuf },
    /// File named explicitly via --config or CMDWARD_CONFIG_PATH
    Explicit { file: PathBuf },
    /// Runtime overrides (--set key=value)
    Runtime,
}

impl ConfigLayerSource {
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::System { file }
            | Self::User { file }
            | Self::Workspace { file }
            | Self::Explicit { file } => Some(file),
            Self::Runtime => None,
        }
    }
}

/// A single layer of configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayerEntry {
    pub source: ConfigLayerSource,
    /// Parsed TOML content
    pub config: TomlValue,
}

impl ConfigLayerEntry {
    pub fn new(source: ConfigLayerSource, config: TomlValue) -> Self {
        Self { source, config }
    }
}

/// Configuration layers, ordered from lowest to highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayerStack {
    layers: Vec<ConfigLayerEntry>,
}

impl ConfigLayerStack {
    pub fn new(layers: Vec<ConfigLayerEntry>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: ConfigLayerEntry) {
        self.layers.push(layer);
    }

    /// Merge all layers into a single effective configuration.
    pub fn effective_config(&self) -> TomlValue {
        let mut merged = TomlValue::Table(toml::Table::new());
        for layer in &self.layers {
            merge_toml_values(&mut merged, &layer.config);
        }
        merged
    }

    pub fn layers(&self) -> &[ConfigLayerEntry] {
        &self.layers
    }

    /// Path of the highest-precedence file-backed layer.
    pub fn last_file(&self) -> Option<&Path> {
        self.layers.iter().rev().find_map(|layer| layer.source.file())
    }
}
