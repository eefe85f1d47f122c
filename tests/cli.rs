use anyhow::Result;
use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// `cmdward` scoped to a fresh workspace, with user/system config out of reach.
fn cmdward(workspace: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("cmdward")?;
    cmd.env("HOME", workspace.path())
        .env_remove("CMDWARD_CONFIG_PATH")
        .env_remove("CMDWARD_WORKSPACE")
        .env_remove("RUST_LOG")
        .arg("--workspace")
        .arg(workspace.path());
    Ok(cmd)
}

#[test]
fn check_reports_policy_decisions() -> Result<()> {
    let workspace = TempDir::new()?;
    cmdward(&workspace)?
        .args(["check", "ls", "rm", "cd", "nmap"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ls: allow"))
        .stdout(predicate::str::contains("rm: deny (deny list)"))
        .stdout(predicate::str::contains("cd: builtin"))
        .stdout(predicate::str::contains("nmap: deny (not on the allow list)"));
    Ok(())
}

#[test]
fn check_json_is_machine_readable() -> Result<()> {
    let workspace = TempDir::new()?;
    let output = cmdward(&workspace)?
        .args(["--json", "check", "/usr/bin/curl"])
        .output()?;
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(entries[0]["decision"], "allow");
    assert_eq!(entries[0]["timeout_seconds"], 60);
    Ok(())
}

#[test]
fn denied_command_fails_without_running() -> Result<()> {
    let workspace = TempDir::new()?;
    let victim = workspace.child("keep.txt");
    victim.write_str("important")?;

    cmdward(&workspace)?
        .args(["run", "--", "rm", "keep.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not allowed"));

    victim.assert("important");
    Ok(())
}

#[test]
fn builtin_names_point_at_the_shell() -> Result<()> {
    let workspace = TempDir::new()?;
    cmdward(&workspace)?
        .args(["run", "--", "cd", "/tmp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cmdward shell"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_executes_in_the_workspace() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace.child("marker.txt").touch()?;

    cmdward(&workspace)?
        .args(["run", "--", "ls", "-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("marker.txt"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_honors_cwd_relative_to_workspace() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace.child("nested/inner.txt").touch()?;

    cmdward(&workspace)?
        .args(["run", "--cwd", "nested", "--", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("inner.txt"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_json_reports_structured_result() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace.child("marker.txt").touch()?;

    let output = cmdward(&workspace)?
        .args(["--json", "run", "--", "ls"])
        .output()?;
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(result["exit_code"], 0);
    assert_eq!(result["timed_out"], false);
    assert_eq!(result["truncated"], false);
    assert!(result["stdout"].as_str().unwrap_or_default().contains("marker.txt"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_propagates_child_exit_code() -> Result<()> {
    let workspace = TempDir::new()?;
    cmdward(&workspace)?
        .args(["run", "--", "ls", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty().not());
    Ok(())
}

#[cfg(unix)]
#[test]
fn timeout_exits_with_124() -> Result<()> {
    let workspace = TempDir::new()?;
    cmdward(&workspace)?
        .args(["--set", "commands.allow_list=[\"sleep\"]"])
        .args(["run", "--timeout", "1", "--", "sleep", "30"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(124)
        .stderr(predicate::str::contains("timed out"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn batch_reports_in_file_order() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace.child("marker.txt").touch()?;
    let batch = workspace.child("jobs.txt");
    batch.write_str("# listing\nls\n\nrm marker.txt\nwhoami\n")?;

    let output = cmdward(&workspace)?
        .args(["batch"])
        .arg(batch.path())
        .output()?;
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8(output.stdout)?;
    let ls = stdout.find("[2] $ ls").expect("ls reported");
    let rm = stdout.find("[4] $ rm marker.txt").expect("rm reported");
    let whoami = stdout.find("[5] $ whoami").expect("whoami reported");
    assert!(ls < rm && rm < whoami);
    workspace.child("marker.txt").assert(predicate::path::exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn shell_handles_builtins_and_commands() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace.child("sub/inside.txt").touch()?;

    cmdward(&workspace)?
        .arg("shell")
        .write_stdin("echo hello there\ncd sub\npwd\nls\nhistory\nexit\nls\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello there"))
        .stdout(predicate::str::contains("sub\n"))
        .stdout(predicate::str::contains("inside.txt"))
        .stdout(predicate::str::contains("    2  cd sub"));
    Ok(())
}

#[test]
fn config_output_writes_toml() -> Result<()> {
    let workspace = TempDir::new()?;
    let target = workspace.child("out/cmdward.toml");

    cmdward(&workspace)?
        .args(["--set", "timeouts.default_seconds=12", "config", "--output"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written to"));

    target.assert(predicate::str::contains("[timeouts]"));
    target.assert(predicate::str::contains("default_seconds = 12"));
    Ok(())
}

#[test]
fn workspace_file_is_layered_in() -> Result<()> {
    let workspace = TempDir::new()?;
    workspace
        .child("cmdward.toml")
        .write_str("[commands]\ndeny_list = [\"ls\"]\n")?;

    cmdward(&workspace)?
        .args(["check", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ls: deny (deny list)"));
    Ok(())
}

#[test]
fn missing_workspace_is_an_error() -> Result<()> {
    let workspace = TempDir::new()?;
    Command::cargo_bin("cmdward")?
        .env_remove("CMDWARD_CONFIG_PATH")
        .arg("--workspace")
        .arg(workspace.path().join("absent"))
        .args(["check", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    Ok(())
}

#[test]
fn malformed_override_is_rejected() -> Result<()> {
    let workspace = TempDir::new()?;
    cmdward(&workspace)?
        .args(["--set", "no-equals-sign", "check", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
    Ok(())
}
