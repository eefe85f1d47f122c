pub mod commands;
pub mod output;

pub use commands::CommandsConfig;
pub use output::OutputConfig;
