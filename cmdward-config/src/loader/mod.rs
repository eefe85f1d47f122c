pub mod layers;

mod builder;
mod config;
mod manager;
mod merge;


pub use builder::{ConfigBuilder, parse_override};
pub use config::CmdwardConfig;
pub use manager::{ConfigManager, ConfigPaths};
pub use merge::merge_toml_values;
