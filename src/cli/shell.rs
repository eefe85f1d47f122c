//! Line-oriented interactive front end.
//!
//! Built-in names classified as such by the policy are handled here; every
//! other line goes through the supervisor with the session's directory as the
//! working directory.

use std::collections::VecDeque;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cmdward_exec::{CommandRequest, PolicyDecision, ProcessSupervisor, normalize_program};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::print_result_streams;
use crate::startup::StartupContext;

const PROMPT: &str = "cmdward> ";
const HISTORY_LIMIT: usize = 1_000;

#[derive(Debug, PartialEq, Eq)]
enum Builtin {
    Output(String),
    Silent,
    Exit,
}

#[derive(Debug)]
struct ShellSession {
    cwd: PathBuf,
    history: VecDeque<String>,
}

impl ShellSession {
    fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            history: VecDeque::new(),
        }
    }

    fn record(&mut self, line: &str) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    /// Handle a built-in, or return `None` if this session does not implement `name`.
    fn builtin(&mut self, name: &str, args: &[String]) -> Option<Result<Builtin>> {
        let outcome = match name {
            "exit" | "quit" => Ok(Builtin::Exit),
            "pwd" => Ok(Builtin::Output(self.cwd.display().to_string())),
            "echo" => Ok(Builtin::Output(args.join(" "))),
            "cd" => self.change_dir(args.first().map(String::as_str)),
            "history" => Ok(Builtin::Output(self.render_history())),
            "help" => Ok(Builtin::Output(help_text())),
            "clear" => Ok(Builtin::Output("\x1b[2J\x1b[H".to_string())),
            _ => return None,
        };
        Some(outcome)
    }

    fn change_dir(&mut self, target: Option<&str>) -> Result<Builtin> {
        let target = match target {
            Some(dir) => PathBuf::from(dir),
            None => match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Ok(Builtin::Silent),
            },
        };
        let candidate = resolve_against(&self.cwd, &target);
        let resolved = candidate
            .canonicalize()
            .with_context(|| format!("cd: no such directory: {}", target.display()))?;
        if !resolved.is_dir() {
            anyhow::bail!("cd: not a directory: {}", target.display());
        }
        self.cwd = resolved;
        Ok(Builtin::Silent)
    }

    fn render_history(&self) -> String {
        self.history
            .iter()
            .enumerate()
            .map(|(index, line)| format!("{:>5}  {line}", index + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn resolve_against(base: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    }
}

/// Normalized name when `program` should be answered by the session itself.
fn builtin_name(supervisor: &ProcessSupervisor, program: &str) -> Option<String> {
    let name = normalize_program(program);
    let handled_here = matches!(name.as_str(), "exit" | "quit")
        || supervisor.classify(program) == PolicyDecision::BuiltinDefer;
    handled_here.then_some(name)
}

fn help_text() -> String {
    [
        "Built-ins: cd [DIR], pwd, echo ARGS, history, clear, help, exit",
        "Anything else runs under the execution policy; try `cmdward check NAME`.",
    ]
    .join("\n")
}

pub async fn handle_shell_command(
    supervisor: &ProcessSupervisor,
    startup: &StartupContext,
) -> Result<i32> {
    let interactive = std::io::stdin().is_terminal();
    let mut session = ShellSession::new(startup.workspace.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_status = 0;

    loop {
        if interactive {
            print!("{PROMPT}");
            std::io::stdout().flush().ok();
        }

        let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read from stdin")?
        else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        session.record(line);

        let argv = match shell_words::split(line) {
            Ok(argv) if !argv.is_empty() => argv,
            Ok(_) => continue,
            Err(err) => {
                eprintln!("parse error: {err}");
                last_status = 2;
                continue;
            }
        };

        if let Some(name) = builtin_name(supervisor, &argv[0]) {
            match session.builtin(&name, &argv[1..]) {
                Some(Ok(Builtin::Exit)) => break,
                Some(Ok(Builtin::Output(text))) => {
                    println!("{text}");
                    last_status = 0;
                }
                Some(Ok(Builtin::Silent)) => last_status = 0,
                Some(Err(err)) => {
                    eprintln!("{err:#}");
                    last_status = 1;
                }
                None => {
                    eprintln!("built-in `{name}` is not supported by this shell");
                    last_status = 1;
                }
            }
            continue;
        }

        let request = CommandRequest::new(argv).with_working_dir(session.cwd.clone());
        let result = supervisor.run(request).await;
        print_result_streams(&result);
        last_status = result.exit_code;
    }

    Ok(last_status)
}
