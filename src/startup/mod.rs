use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cmdward_config::constants::defaults::CONFIG_PATH_ENV;
use cmdward_config::{CmdwardConfig, ConfigBuilder, parse_override};
use cmdward_exec::ProcessSupervisor;
use cmdward_exec_events::TracingEmitter;
use tracing::Level;

use crate::cli::args::Cli;

/// Everything resolved from the command line before a subcommand runs.
#[derive(Debug, Clone)]
pub struct StartupContext {
    pub workspace: PathBuf,
    pub config: CmdwardConfig,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl StartupContext {
    pub fn from_cli_args(args: &Cli) -> Result<Self> {
        let workspace = resolve_workspace(args.workspace.as_deref())?;

        let overrides = args
            .overrides
            .iter()
            .map(|raw| parse_override(raw))
            .collect::<Result<Vec<_>>>()?;

        let mut builder = ConfigBuilder::new().workspace(workspace.clone());
        if let Some(config_file) = explicit_config_file(args) {
            builder = builder.config_file(config_file);
        }
        let manager = builder
            .cli_overrides(&overrides)
            .build()
            .context("Failed to load cmdward configuration")?;

        let config_path = manager.config_path().map(Path::to_path_buf);

        Ok(Self {
            workspace,
            config: manager.into_config(),
            config_path,
            json: args.json,
        })
    }

    /// Supervisor rooted at the workspace, reporting lifecycle events through tracing.
    pub fn build_supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::from_config(&self.config)
            .with_base_dir(self.workspace.clone())
            .with_emitter(Arc::new(TracingEmitter::new(Level::DEBUG)))
    }
}

fn explicit_config_file(args: &Cli) -> Option<PathBuf> {
    args.config.clone().or_else(|| {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

fn resolve_workspace(workspace: Option<&Path>) -> Result<PathBuf> {
    let Some(path) = workspace else {
        return std::env::current_dir().context("Failed to resolve current directory");
    };

    if !path.exists() {
        bail!("Workspace path '{}' does not exist", path.display());
    }
    if !path.is_dir() {
        bail!("Workspace path '{}' is not a directory", path.display());
    }
    path.canonicalize()
        .with_context(|| format!("Failed to resolve workspace '{}'", path.display()))
}
