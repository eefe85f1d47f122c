//! Logging configuration

use serde::{Deserialize, Serialize};

/// Default crates whose events are shown when no targets are configured.
pub const DEFAULT_TRACE_TARGETS: &[&str] = &["cmdward", "cmdward_exec", "cmdward_exec_events"];

/// Trace level for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown levels fall back to the default instead of failing the whole load.
impl<'de> Deserialize<'de> for TraceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw).unwrap_or_default())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level (error, warn, info, debug, trace); defaults to warn
    #[serde(default)]
    pub level: TraceLevel,

    /// Tracing targets to enable, e.g. "cmdward_exec::supervisor"
    #[serde(default)]
    pub targets: Vec<String>,
}

impl LoggingConfig {
    /// Build an `EnvFilter`-compatible directive string.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str();
        if self.targets.is_empty() {
            DEFAULT_TRACE_TARGETS
                .iter()
                .map(|target| format!("{target}={level}"))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            self.targets
                .iter()
                .map(|target| format!("{target}={level}"))
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_warn() {
        let config: LoggingConfig = toml::from_str("level = \"loud\"").expect("parse");
        assert_eq!(config.level, TraceLevel::Warn);
    }

    #[test]
    fn directive_uses_default_targets() {
        let config = LoggingConfig {
            level: TraceLevel::Debug,
            targets: Vec::new(),
        };
        assert_eq!(
            config.filter_directive(),
            "cmdward=debug,cmdward_exec=debug,cmdward_exec_events=debug"
        );
    }

    #[test]
    fn directive_uses_configured_targets() {
        let config = LoggingConfig {
            level: TraceLevel::Warn,
            targets: vec!["cmdward_exec::registry".into()],
        };
        assert_eq!(config.filter_directive(), "cmdward_exec::registry=warn");
    }
}
