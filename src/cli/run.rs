use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cmdward_config::timeouts::resolve_timeout;
use cmdward_exec::{CommandRequest, ExecutionResult, FailureKind, ProcessSupervisor};

use super::print_result_streams;

#[derive(Debug, Clone, Default)]
pub struct RunCommandOptions {
    pub cwd: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub json: bool,
}

pub async fn handle_run_command(
    supervisor: &ProcessSupervisor,
    argv: Vec<String>,
    options: RunCommandOptions,
) -> Result<i32> {
    let request = build_request(argv, &options);
    let result = supervisor.run(request).await;

    if options.json {
        let payload =
            serde_json::to_string_pretty(&result).context("Failed to serialize run result")?;
        println!("{payload}");
    } else {
        print_result_streams(&result);
        print_hint(&result);
    }

    Ok(result.exit_code)
}

fn build_request(argv: Vec<String>, options: &RunCommandOptions) -> CommandRequest {
    let mut request = CommandRequest::new(argv);
    if let Some(cwd) = &options.cwd {
        request = request.with_working_dir(cwd.clone());
    }
    if let Some(secs) = options.timeout_secs {
        // 0 selects the built-in default; other values are clamped to the allowed range
        request = request.with_timeout(Duration::from_secs(resolve_timeout(Some(secs))));
    }
    request
}

fn print_hint(result: &ExecutionResult) {
    if result.failure == Some(FailureKind::BuiltinRequired) {
        eprintln!("hint: built-ins are available inside `cmdward shell`");
    }
}
