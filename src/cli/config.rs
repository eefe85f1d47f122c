use std::path::Path;

use anyhow::{Context, Result};

use crate::startup::StartupContext;

/// Print the effective configuration, or write it to `output`.
pub fn handle_config_command(startup: &StartupContext, output: Option<&Path>) -> Result<i32> {
    if let Some(path) = output {
        startup
            .config
            .write_to_path(path)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        println!("Configuration written to {}", path.display());
        return Ok(0);
    }

    if let Some(source) = &startup.config_path {
        println!("# loaded from {}", source.display());
    }
    let rendered = startup
        .config
        .to_toml_string()
        .context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(0)
}
