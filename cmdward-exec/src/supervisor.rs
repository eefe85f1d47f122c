use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cmdward_config::CmdwardConfig;
use cmdward_exec_events::{
    CommandCompletedEvent, CommandStartedEvent, CommandTerminatedEvent, CommandTimedOutEvent,
    DenialReason, EventEmitter, ExecEvent, NoopEmitter, PolicyDeniedEvent,
    RegistryInconsistentEvent, SpawnFailedEvent, SpawnFailureKind, TerminationReason,
};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecError, FailureKind, GENERIC_FAILURE_EXIT_CODE, TERMINATED_EXIT_CODE};
use crate::pipe::{self, SpawnOptions, SpawnedChild, StreamCapture};
use crate::policy::{ExecutionPolicy, PolicyDecision, PolicyGuard};
use crate::process_group::{
    EscalationOutcome, KillSignal, ProcessTree, ProcessTreeTerminator, SystemTerminator,
};
use crate::registry::{HandleId, ProcessHandle, ProcessRegistry, TerminationReport};
use crate::request::CommandRequest;
use crate::result::ExecutionResult;
use crate::sanitizer::OutputSanitizer;

/// How long to wait for output pipes to reach EOF once the child is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled(TerminationReason),
}

/// Spawns allowed commands in their own process groups, enforces deadlines,
/// and tracks every live child in a [`ProcessRegistry`].
///
/// Construct one per process and share it by reference (or `Arc`).
pub struct ProcessSupervisor {
    guard: PolicyGuard,
    sanitizer: OutputSanitizer,
    registry: Arc<ProcessRegistry>,
    emitter: Arc<dyn EventEmitter>,
    base_dir: PathBuf,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("guard", &self.guard)
            .field("sanitizer", &self.sanitizer)
            .field("registry", &self.registry)
            .field("base_dir", &self.base_dir)
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(policy: ExecutionPolicy, sanitizer: OutputSanitizer) -> Self {
        let registry = Arc::new(ProcessRegistry::new(
            Arc::new(SystemTerminator),
            policy.grace_period(),
        ));
        let base_dir = std::env::current_dir().unwrap_or_else(|err| {
            warn!(error = %err, "cannot resolve current directory; using '.'");
            PathBuf::from(".")
        });
        Self {
            guard: PolicyGuard::new(Arc::new(policy)),
            sanitizer,
            registry,
            emitter: Arc::new(NoopEmitter),
            base_dir,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &CmdwardConfig) -> Self {
        Self::new(
            ExecutionPolicy::from_config(config),
            OutputSanitizer::new(config.output.max_bytes),
        )
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Replace the OS signalling backend. Call before running anything.
    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTreeTerminator>) -> Self {
        self.registry = Arc::new(ProcessRegistry::new(
            terminator,
            self.guard.policy().grace_period(),
        ));
        self
    }

    /// Directory used when a request has no usable working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        self.guard.policy()
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn classify(&self, program: &str) -> PolicyDecision {
        self.guard.evaluate(program)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Refuse new work and terminate every tracked process.
    pub async fn shutdown(&self) -> TerminationReport {
        self.shutdown.cancel();
        let registry = Arc::clone(&self.registry);
        match tokio::task::spawn_blocking(move || registry.terminate_all()).await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "termination task failed; retrying inline");
                self.registry.terminate_all()
            }
        }
    }

    /// Synchronous variant of [`shutdown`](Self::shutdown) for drop paths.
    pub fn shutdown_blocking(&self) -> TerminationReport {
        self.shutdown.cancel();
        self.registry.terminate_all()
    }

    /// Terminate one tracked process.
    pub async fn terminate(&self, id: HandleId) -> Option<EscalationOutcome> {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.terminate_one(id))
            .await
            .unwrap_or_else(|err| {
                error!(%id, error = %err, "termination task failed");
                None
            })
    }

    /// Run one command to completion, deadline, or cancellation.
    ///
    /// Every failure is folded into the returned [`ExecutionResult`].
    pub async fn run(&self, request: CommandRequest) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let result = match self.run_inner(run_id, &request, started).await {
            Ok(result) => result,
            Err(err) => {
                debug!(%run_id, error = %err, "command did not run");
                ExecutionResult::from_error(&err)
            }
        };
        result.with_duration_ms(elapsed_ms(started))
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        request: &CommandRequest,
        started: Instant,
    ) -> Result<ExecutionResult, ExecError> {
        let program = request.program().ok_or(ExecError::EmptyCommand)?;

        if self.shutdown.is_cancelled() {
            return Err(ExecError::Terminated);
        }

        match self.guard.evaluate(program) {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny(reason) => {
                self.emit_denied(run_id, program, reason);
                return Err(ExecError::PolicyDenied {
                    program: program.to_string(),
                });
            }
            PolicyDecision::BuiltinDefer => {
                self.emit_denied(run_id, program, DenialReason::Builtin);
                return Err(ExecError::BuiltinRequired {
                    program: program.to_string(),
                });
            }
        }

        let timeout = request
            .timeout()
            .unwrap_or_else(|| self.guard.policy().resolve_timeout(program));
        let working_dir = self.resolve_working_dir(request.working_dir());

        let options = SpawnOptions::new(program, working_dir.clone())
            .args(request.args().iter().cloned())
            .capture_limit(self.sanitizer.capture_limit());
        let SpawnedChild {
            mut child,
            tree,
            stdout,
            stderr,
        } = pipe::spawn_in_new_group(&options).map_err(|err| {
            let failure = ExecError::from_spawn_error(program, &err);
            self.emit_spawn_failed(run_id, program, &failure, &err);
            failure
        })?;

        let cancel = request.cancellation().cloned().unwrap_or_default();
        let handle = ProcessHandle {
            id: self.registry.next_id(),
            pid: tree.pid,
            pgid: tree.pgid,
            started_at: Utc::now(),
            timeout,
        };
        let mut registration = Registration::new(self, handle.clone(), cancel.clone());

        info!(
            %run_id,
            program,
            pid = tree.pid,
            pgid = tree.pgid,
            cwd = %working_dir.display(),
            timeout_ms = duration_ms(timeout),
            "spawned command"
        );
        self.emit(ExecEvent::CommandStarted(CommandStartedEvent {
            run_id,
            timestamp: Utc::now(),
            program: program.to_string(),
            args: request.args().to_vec(),
            pid: tree.pid,
            process_group: tree.pgid,
            working_dir: working_dir.clone(),
            timeout_ms: duration_ms(timeout),
        }));

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            () = cancel.cancelled() => WaitOutcome::Cancelled(TerminationReason::Cancelled),
            () = self.shutdown.cancelled() => WaitOutcome::Cancelled(TerminationReason::Shutdown),
        };

        let result = match outcome {
            WaitOutcome::Exited(Ok(status)) => {
                self.reap_lingering(tree);
                registration.finish();

                let interrupted = cancel.is_cancelled() || self.shutdown.is_cancelled();
                let terminated = interrupted && !status.success();
                let (out, err, truncated) = self.collect_output(stdout, stderr).await;
                let exit_code = if terminated {
                    TERMINATED_EXIT_CODE
                } else {
                    exit_code_of(status)
                };
                info!(%run_id, program, exit_code, truncated, "command finished");
                self.emit(ExecEvent::CommandCompleted(CommandCompletedEvent {
                    run_id,
                    timestamp: Utc::now(),
                    program: program.to_string(),
                    exit_code,
                    duration_ms: elapsed_ms(started),
                    truncated,
                }));
                ExecutionResult {
                    stdout: out,
                    stderr: err,
                    exit_code,
                    timed_out: false,
                    truncated,
                    terminated,
                    failure: terminated.then_some(FailureKind::Terminated),
                    duration_ms: 0,
                }
            }
            WaitOutcome::Exited(Err(wait_err)) => {
                error!(%run_id, program, error = %wait_err, "failed to wait for command");
                let _ = self.escalate(&mut child, tree).await;
                registration.finish();
                let _ = self.collect_output(stdout, stderr).await;
                return Err(ExecError::SpawnFailure {
                    program: program.to_string(),
                    reason: format!("failed to wait for process: {wait_err}"),
                });
            }
            WaitOutcome::TimedOut => {
                warn!(
                    %run_id,
                    program,
                    pid = tree.pid,
                    timeout_ms = duration_ms(timeout),
                    "command timed out; terminating process group"
                );
                let escalation = self.escalate(&mut child, tree).await;
                registration.finish();
                self.emit(ExecEvent::CommandTimedOut(CommandTimedOutEvent {
                    run_id,
                    timestamp: Utc::now(),
                    program: program.to_string(),
                    timeout_ms: duration_ms(timeout),
                    escalation,
                }));
                self.interrupted_result(ExecError::timeout(timeout), stdout, stderr)
                    .await
            }
            WaitOutcome::Cancelled(reason) => {
                info!(
                    %run_id,
                    program,
                    pid = tree.pid,
                    ?reason,
                    "command cancelled; terminating process group"
                );
                let escalation = self.escalate(&mut child, tree).await;
                registration.finish();
                debug!(%run_id, ?escalation, "cancellation escalation finished");
                self.emit(ExecEvent::CommandTerminated(CommandTerminatedEvent {
                    run_id,
                    timestamp: Utc::now(),
                    program: program.to_string(),
                    reason,
                }));
                self.interrupted_result(ExecError::Terminated, stdout, stderr)
                    .await
            }
        };

        Ok(result)
    }

    fn resolve_working_dir(&self, requested: Option<&Path>) -> PathBuf {
        let Some(dir) = requested else {
            return self.base_dir.clone();
        };
        let candidate = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        };
        if candidate.is_dir() {
            candidate
        } else {
            warn!(
                requested = %dir.display(),
                fallback = %self.base_dir.display(),
                "working directory does not exist; using supervisor directory"
            );
            self.base_dir.clone()
        }
    }

    /// TERM the group, give it the grace period, then KILL and reap.
    async fn escalate(&self, child: &mut Child, tree: ProcessTree) -> EscalationOutcome {
        let terminator = self.registry.terminator();
        let grace = self.registry.grace_period();

        if matches!(child.try_wait(), Ok(Some(_))) && !terminator.is_alive(tree) {
            return EscalationOutcome::AlreadyExited;
        }

        if let Err(err) = terminator.signal_tree(tree, KillSignal::Term) {
            warn!(%tree, error = %err, "graceful signal failed; escalating");
        }

        let leader_exited = matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)));
        if leader_exited && !terminator.is_alive(tree) {
            return EscalationOutcome::GracefulExit;
        }

        let outcome = match terminator.signal_tree(tree, KillSignal::Kill) {
            Ok(()) => EscalationOutcome::ForcefulKill,
            Err(err) => {
                error!(%tree, error = %err, "failed to kill process group");
                EscalationOutcome::Error
            }
        };
        if !leader_exited && let Err(err) = child.wait().await {
            error!(%tree, error = %err, "failed to reap killed process");
            return EscalationOutcome::Error;
        }
        outcome
    }

    /// Kill descendants that outlived a leader which exited on its own.
    fn reap_lingering(&self, tree: ProcessTree) {
        let terminator = self.registry.terminator();
        if !terminator.is_alive(tree) {
            return;
        }
        debug!(%tree, "leader exited but its group is still alive; killing stragglers");
        if let Err(err) = terminator.signal_tree(tree, KillSignal::Kill) {
            warn!(%tree, error = %err, "failed to kill lingering group members");
        }
    }

    async fn collect_output(
        &self,
        stdout: StreamCapture,
        stderr: StreamCapture,
    ) -> (String, String, bool) {
        let (out, err) = tokio::join!(
            stdout.finish(OUTPUT_DRAIN_TIMEOUT),
            stderr.finish(OUTPUT_DRAIN_TIMEOUT)
        );
        let out = self.sanitizer.sanitize_capture(&out.bytes, out.overflowed);
        let err = self.sanitizer.sanitize_capture(&err.bytes, err.overflowed);
        let truncated = out.truncated || err.truncated;
        (out.text, err.text, truncated)
    }

    async fn interrupted_result(
        &self,
        failure: ExecError,
        stdout: StreamCapture,
        stderr: StreamCapture,
    ) -> ExecutionResult {
        let (out, err, truncated) = self.collect_output(stdout, stderr).await;
        let message = failure.to_string();
        let stderr = if err.is_empty() {
            message
        } else {
            self.sanitizer.sanitize(&format!("{message}\n{err}")).text
        };
        ExecutionResult {
            stdout: out,
            stderr,
            truncated,
            ..ExecutionResult::from_error(&failure)
        }
    }

    fn emit(&self, event: ExecEvent) {
        self.emitter.emit(&event);
    }

    fn emit_denied(&self, run_id: Uuid, program: &str, reason: DenialReason) {
        warn!(%run_id, program, ?reason, "command refused by policy");
        self.emit(ExecEvent::PolicyDenied(PolicyDeniedEvent {
            run_id,
            timestamp: Utc::now(),
            program: program.to_string(),
            reason,
        }));
    }

    fn emit_spawn_failed(
        &self,
        run_id: Uuid,
        program: &str,
        failure: &ExecError,
        err: &std::io::Error,
    ) {
        let kind = match failure {
            ExecError::NotFound { .. } => SpawnFailureKind::NotFound,
            ExecError::PermissionDenied { .. } => SpawnFailureKind::PermissionDenied,
            _ => SpawnFailureKind::Other,
        };
        warn!(%run_id, program, ?kind, error = %err, "failed to spawn command");
        self.emit(ExecEvent::SpawnFailed(SpawnFailedEvent {
            run_id,
            timestamp: Utc::now(),
            program: program.to_string(),
            kind,
            message: err.to_string(),
        }));
    }

    fn report_inconsistency(&self, id: HandleId, detail: String) {
        error!(%id, %detail, "process registry inconsistency");
        self.emit(ExecEvent::RegistryInconsistent(RegistryInconsistentEvent {
            timestamp: Utc::now(),
            handle_id: id.as_u64(),
            detail,
        }));
    }
}

/// Keeps a handle registered for the lifetime of one `run`.
///
/// Dropping it unfinished (the `run` future was abandoned) kills the group
/// and removes the entry.
struct Registration<'a> {
    supervisor: &'a ProcessSupervisor,
    handle: ProcessHandle,
    finished: bool,
}

impl<'a> Registration<'a> {
    fn new(
        supervisor: &'a ProcessSupervisor,
        handle: ProcessHandle,
        cancel: CancellationToken,
    ) -> Self {
        if !supervisor.registry.register(handle.clone(), cancel) {
            supervisor.report_inconsistency(
                handle.id,
                "handle id was already registered".to_string(),
            );
        }
        Self {
            supervisor,
            handle,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Absent is fine: a termination pass may have cleared it already.
        if let Some(removed) = self.supervisor.registry.unregister(self.handle.id)
            && removed.pid != self.handle.pid
        {
            self.supervisor.report_inconsistency(
                self.handle.id,
                format!(
                    "registered pid {} does not match supervised pid {}",
                    removed.pid, self.handle.pid
                ),
            );
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let tree = self.handle.tree();
        warn!(id = %self.handle.id, %tree, "run abandoned; killing process group");
        if let Err(err) = self
            .supervisor
            .registry
            .terminator()
            .signal_tree(tree, KillSignal::Kill)
        {
            warn!(%tree, error = %err, "failed to kill abandoned process group");
        }
        self.finish();
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    GENERIC_FAILURE_EXIT_CODE
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}
