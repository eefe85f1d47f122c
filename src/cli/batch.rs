use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cmdward_exec::{CommandRequest, ExecutionResult, ProcessSupervisor};
use serde::Serialize;
use tracing::debug;

use super::print_result_streams;

#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchLine {
    line: usize,
    command: String,
    argv: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    line: usize,
    command: String,
    #[serde(flatten)]
    result: ExecutionResult,
}

/// Split a batch file into commands, skipping blank lines and `#` comments.
fn parse_batch(contents: &str) -> Result<Vec<BatchLine>> {
    let mut commands = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = index + 1;
        let argv = shell_words::split(trimmed)
            .with_context(|| format!("line {line}: cannot tokenize `{trimmed}`"))?;
        commands.push(BatchLine {
            line,
            command: trimmed.to_string(),
            argv,
        });
    }
    Ok(commands)
}

/// Run all commands from `file` concurrently and report them in file order.
///
/// Exits 0 only when every command succeeded.
pub async fn handle_batch_command(
    supervisor: Arc<ProcessSupervisor>,
    file: &Path,
    json: bool,
) -> Result<i32> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;
    let commands = parse_batch(&contents)?;
    debug!(count = commands.len(), file = %file.display(), "starting batch");

    let handles: Vec<_> = commands
        .into_iter()
        .map(|entry| {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                let result = supervisor.run(CommandRequest::new(entry.argv)).await;
                BatchReport {
                    line: entry.line,
                    command: entry.command,
                    result,
                }
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await.context("batch task failed")?);
    }

    let all_succeeded = reports.iter().all(|report| report.result.success());

    if json {
        let payload =
            serde_json::to_string_pretty(&reports).context("Failed to serialize batch results")?;
        println!("{payload}");
    } else {
        for report in &reports {
            println!("[{}] $ {}", report.line, report.command);
            print_result_streams(&report.result);
            println!("[{}] exit {}", report.line, report.result.exit_code);
        }
    }

    Ok(if all_succeeded { 0 } else { 1 })
}
