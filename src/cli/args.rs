//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "cmdward",
    version,
    about = "Run external commands under an allow/deny policy with timeouts and bounded output",
    long_about = None
)]
pub struct Cli {
    /// Configuration file to use instead of <workspace>/cmdward.toml
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Workspace directory; commands run here unless told otherwise
    #[arg(long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Override a configuration value, e.g. `--set timeouts.default_seconds=10`
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one command under supervision and exit with its status
    Run {
        /// Working directory, relative to the workspace
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Deadline in seconds for this run
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Program followed by its arguments
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        argv: Vec<String>,
    },

    /// Show how the policy classifies program names
    Check {
        #[arg(required = true, value_name = "PROGRAM")]
        programs: Vec<String>,
    },

    /// Run every command line in a file concurrently
    Batch {
        /// One command per line; blank lines and `#` comments are skipped
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Interactive prompt with built-in cd, pwd, echo and history
    Shell,

    /// Print the effective configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
