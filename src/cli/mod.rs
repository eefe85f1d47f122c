use std::sync::Arc;

use anyhow::Result;
use cmdward_exec::{ExecutionResult, ProcessSupervisor};

use crate::startup::StartupContext;

pub mod args;
mod batch;
mod check;
mod config;
mod run;
mod shell;

pub use batch::handle_batch_command;
pub use check::handle_check_command;
pub use config::handle_config_command;
pub use run::{RunCommandOptions, handle_run_command};
pub use shell::handle_shell_command;

use args::{Cli, Commands};

/// Run the selected subcommand and return the process exit status.
pub async fn dispatch(
    args: &Cli,
    startup: &StartupContext,
    supervisor: Arc<ProcessSupervisor>,
) -> Result<i32> {
    match &args.command {
        Commands::Run { cwd, timeout, argv } => {
            let options = RunCommandOptions {
                cwd: cwd.clone(),
                timeout_secs: *timeout,
                json: startup.json,
            };
            handle_run_command(&supervisor, argv.clone(), options).await
        }
        Commands::Check { programs } => handle_check_command(&supervisor, programs, startup.json),
        Commands::Batch { file } => handle_batch_command(supervisor, file, startup.json).await,
        Commands::Shell => handle_shell_command(&supervisor, startup).await,
        Commands::Config { output } => handle_config_command(startup, output.as_deref()),
    }
}

/// Write captured output the way the child would have, stdout then stderr.
pub(crate) fn print_result_streams(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
}
