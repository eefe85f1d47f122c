#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use cmdward_exec::{
    CommandRequest, ExecutionPolicy, FailureKind, OutputSanitizer, ProcessSupervisor,
    TERMINATED_EXIT_CODE, TIMEOUT_EXIT_CODE, TRUNCATION_MARKER,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const GRACE: Duration = Duration::from_millis(300);

fn supervisor(max_bytes: usize) -> ProcessSupervisor {
    let policy = ExecutionPolicy::new(Duration::from_secs(10), GRACE)
        .allow(["sh", "sleep", "echo", "printf", "pwd", "cat"])
        .deny(["rm"]);
    ProcessSupervisor::new(policy, OutputSanitizer::new(max_bytes))
}

fn pid_is_alive(pid: i32) -> bool {
    let exists = matches!(
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None),
        Ok(()) | Err(nix::errno::Errno::EPERM)
    );
    if !exists {
        return false;
    }
    // Orphans may linger as zombies until init reaps them.
    #[cfg(target_os = "linux")]
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat"))
        && let Some((_, rest)) = stat.rsplit_once(") ")
    {
        return !rest.starts_with('Z');
    }
    true
}

#[tokio::test]
async fn completed_command_reports_output_and_exit_code() {
    let supervisor = supervisor(10_000);
    let result = supervisor
        .run(CommandRequest::new([
            "sh",
            "-c",
            "echo '  hello  '; echo oops >&2; exit 3",
        ]))
        .await;

    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "oops");
    assert_eq!(result.exit_code, 3);
    assert!(!result.timed_out);
    assert!(!result.truncated);
    assert_eq!(result.failure, None);
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn timeout_kills_group_and_unregisters() {
    let supervisor = supervisor(10_000);
    let started = Instant::now();
    let result = supervisor
        .run(CommandRequest::new(["sleep", "5"]).with_timeout(Duration::from_secs(1)))
        .await;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(1) + GRACE + Duration::from_secs(2));
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn timeout_reaches_grandchildren_that_ignore_term() {
    let supervisor = supervisor(10_000);
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!(
        "trap '' TERM; sleep 30 & echo $! > {}; wait",
        pid_file.display()
    );

    let result = supervisor
        .run(CommandRequest::new(["sh", "-c", script.as_str()]).with_timeout(Duration::from_secs(1)))
        .await;
    assert!(result.timed_out);

    let grandchild: i32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pid_is_alive(grandchild), "grandchild {grandchild} survived");
}

#[tokio::test]
async fn missing_executable_returns_not_found_sentinel() {
    let policy = ExecutionPolicy::new(Duration::from_secs(5), GRACE).allow(["no-such-tool-xyz"]);
    let supervisor = ProcessSupervisor::new(policy, OutputSanitizer::new(1_000));
    let result = supervisor.run(CommandRequest::new(["no-such-tool-xyz"])).await;

    assert_eq!(result.exit_code, 127);
    assert_eq!(result.failure, Some(FailureKind::NotFound));
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn long_output_is_truncated_with_marker() {
    let supervisor = supervisor(100);
    let result = supervisor
        .run(CommandRequest::new([
            "sh",
            "-c",
            "i=0; while [ $i -lt 200 ]; do printf 'abcdefghij'; i=$((i+1)); done",
        ]))
        .await;

    assert!(result.truncated);
    assert_eq!(result.stdout.len(), 100 + TRUNCATION_MARKER.len());
    assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn working_dir_override_is_used_when_it_exists() {
    let supervisor = supervisor(10_000);
    let dir = tempfile::tempdir().expect("tempdir");
    let expected = dir.path().canonicalize().expect("canonical");

    let result = supervisor
        .run(CommandRequest::new(["pwd"]).with_working_dir(&expected))
        .await;
    assert_eq!(result.stdout, expected.display().to_string());

    let fallback = supervisor
        .run(CommandRequest::new(["pwd"]).with_working_dir("/definitely/missing/dir"))
        .await;
    assert_eq!(fallback.exit_code, 0);
    assert_eq!(
        fallback.stdout,
        supervisor
            .base_dir()
            .canonicalize()
            .expect("canonical")
            .display()
            .to_string()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_commands_complete_independently() {
    let supervisor = Arc::new(supervisor(10_000));
    let mut tasks = Vec::new();
    for i in 0..64 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move {
            let result = supervisor
                .run(CommandRequest::new(["echo".to_string(), format!("job-{i}")]))
                .await;
            (i, result)
        }));
    }

    for task in tasks {
        let (i, result) = task.await.expect("join");
        assert_eq!(result.exit_code, 0, "job {i}: {}", result.stderr);
        assert_eq!(result.stdout, format!("job-{i}"));
    }
    assert!(supervisor.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_terminates_all_in_flight_commands() {
    let supervisor = Arc::new(supervisor(10_000));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move {
            supervisor.run(CommandRequest::new(["sleep", "30"])).await
        }));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.registry().len() < 8 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let pids: Vec<u32> = supervisor.registry().snapshot().iter().map(|h| h.pid).collect();
    assert_eq!(pids.len(), 8);

    let started = Instant::now();
    let report = supervisor.shutdown().await;
    assert_eq!(report.len(), 8);
    assert!(started.elapsed() < GRACE + Duration::from_secs(1));

    for task in tasks {
        let result = task.await.expect("join");
        assert!(result.terminated || result.timed_out);
        assert_eq!(result.exit_code, TERMINATED_EXIT_CODE);
    }
    assert!(supervisor.registry().is_empty());
    for pid in pids {
        assert!(!pid_is_alive(pid as i32), "pid {pid} survived shutdown");
    }
}

#[tokio::test]
async fn cancellation_token_stops_a_single_run() {
    let supervisor = supervisor(10_000);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = supervisor
        .run(CommandRequest::new(["sleep", "30"]).with_cancellation(token))
        .await;

    assert!(result.terminated);
    assert!(!result.timed_out);
    assert_eq!(result.failure, Some(FailureKind::Terminated));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(supervisor.registry().is_empty());
}
