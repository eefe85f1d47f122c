//! Configuration loading for cmdward.
//!
//! Settings live in `cmdward.toml`. The loader stacks the system, user and
//! workspace files (plus runtime overrides) and merges them table by table
//! before deserializing into [`CmdwardConfig`].

pub mod constants;
pub mod core;
pub mod debug;
pub mod loader;
pub mod timeouts;

pub use crate::core::{CommandsConfig, OutputConfig};
pub use debug::{LoggingConfig, TraceLevel};
pub use loader::layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};
pub use loader::{
    CmdwardConfig, ConfigBuilder, ConfigManager, ConfigPaths, merge_toml_values, parse_override,
};
pub use timeouts::TimeoutsConfig;
