//! Process-group lifecycle helpers.
//!
//! Every supervised child becomes the leader of its own process group (a new
//! session on Unix, a new console process group on Windows) so the whole
//! subtree it forks can be signalled as one unit.
//!
//! - `configure_new_group` installs the spawn-time hooks on a `Command`, and
//!   `track_tree` attaches a Windows job object once the leader is running.
//! - [`ProcessTreeTerminator`] hides the platform difference between POSIX
//!   group signals and Windows tree termination behind one capability.
//! - [`graceful_terminate`] runs the TERM, grace, KILL escalation for a single
//!   tree from synchronous code.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

pub use cmdward_exec_events::EscalationOutcome;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM / Ctrl+Break: asks the tree to exit.
    Term,
    /// SIGKILL / forced tree termination.
    Kill,
}

/// The leader pid and group id of one spawned tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessTree {
    pub pid: u32,
    pub pgid: u32,
}

impl ProcessTree {
    /// Resolve the tree for a freshly spawned group leader.
    pub fn for_leader(pid: u32) -> Self {
        Self {
            pid,
            pgid: resolve_pgid(pid),
        }
    }
}

impl fmt::Display for ProcessTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} (group {})", self.pid, self.pgid)
    }
}

/// Signals and probes whole process trees.
pub trait ProcessTreeTerminator: Send + Sync + fmt::Debug {
    /// Deliver `signal` to every process in the tree. A tree that is already
    /// gone is not an error.
    fn signal_tree(&self, tree: ProcessTree, signal: KillSignal) -> io::Result<()>;

    /// Whether any member of the tree may still be running.
    fn is_alive(&self, tree: ProcessTree) -> bool;
}

/// [`ProcessTreeTerminator`] backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminator;

/// TERM the tree, wait up to `grace`, then KILL whatever is left.
///
/// Blocks the calling thread; async callers should use `spawn_blocking`.
pub fn graceful_terminate(
    terminator: &dyn ProcessTreeTerminator,
    tree: ProcessTree,
    grace: Duration,
) -> EscalationOutcome {
    if !terminator.is_alive(tree) {
        return EscalationOutcome::AlreadyExited;
    }

    if let Err(err) = terminator.signal_tree(tree, KillSignal::Term) {
        tracing::warn!(%tree, error = %err, "failed to send graceful signal");
        return EscalationOutcome::Error;
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !terminator.is_alive(tree) {
            return EscalationOutcome::GracefulExit;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    match terminator.signal_tree(tree, KillSignal::Kill) {
        Ok(()) => EscalationOutcome::ForcefulKill,
        Err(err) => {
            tracing::warn!(%tree, error = %err, "failed to force-kill process group");
            EscalationOutcome::Error
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::io;

    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::{self, Pid};

    use super::{KillSignal, ProcessTree, ProcessTreeTerminator, SystemTerminator};

    impl KillSignal {
        fn as_nix_signal(self) -> Signal {
            match self {
                KillSignal::Term => Signal::SIGTERM,
                KillSignal::Kill => Signal::SIGKILL,
            }
        }
    }

    pub(super) fn resolve_pgid(pid: u32) -> u32 {
        match unistd::getpgid(Some(Pid::from_raw(pid as libc::pid_t))) {
            Ok(pgid) => pgid.as_raw() as u32,
            Err(_) => pid,
        }
    }

    fn targets_own_group(tree: ProcessTree) -> bool {
        unistd::getpgrp().as_raw() as u32 == tree.pgid
    }

    impl ProcessTreeTerminator for SystemTerminator {
        fn signal_tree(&self, tree: ProcessTree, signal: KillSignal) -> io::Result<()> {
            // Never signal our own group; fall back to the leader alone.
            let result = if targets_own_group(tree) {
                signal::kill(Pid::from_raw(tree.pid as libc::pid_t), signal.as_nix_signal())
            } else {
                signal::killpg(
                    Pid::from_raw(tree.pgid as libc::pid_t),
                    signal.as_nix_signal(),
                )
            };
            match result {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(errno) => Err(io::Error::from(errno)),
            }
        }

        fn is_alive(&self, tree: ProcessTree) -> bool {
            let result = if targets_own_group(tree) {
                signal::kill(Pid::from_raw(tree.pid as libc::pid_t), None)
            } else {
                signal::killpg(Pid::from_raw(tree.pgid as libc::pid_t), None)
            };
            // EPERM: the group exists but belongs to someone else now.
            matches!(result, Ok(()) | Err(Errno::EPERM))
        }
    }

    /// Start a new session so the child leads its own group and has no
    /// controlling TTY.
    pub(super) fn detach_from_tty() -> io::Result<()> {
        match unistd::setsid() {
            Ok(_) => Ok(()),
            // Already a session leader.
            Err(Errno::EPERM) => unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(io::Error::from),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    /// Deliver SIGTERM to the child if the supervisor dies first.
    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    pub(super) fn set_parent_death_signal(parent_pid: libc::pid_t) -> io::Result<()> {
        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) } == -1 {
            return Err(io::Error::last_os_error());
        }

        // The parent may have exited between fork and prctl.
        if unistd::getppid().as_raw() != parent_pid {
            signal::raise(Signal::SIGTERM).ok();
        }
        Ok(())
    }
}

#[cfg(unix)]
use unix::resolve_pgid;

/// Make `command` spawn as the leader of a new process group.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn configure_new_group(command: &mut tokio::process::Command) {
    #[cfg(target_os = "linux")]
    let parent_pid = nix::unistd::getpid().as_raw();

    // SAFETY: the hook only performs async-signal-safe syscalls.
    unsafe {
        command.pre_exec(move || {
            unix::detach_from_tty()?;
            #[cfg(target_os = "linux")]
            unix::set_parent_death_signal(parent_pid)?;
            Ok(())
        });
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::mem;
    use std::os::windows::io::RawHandle;
    use std::process::{Command, Stdio};
    use std::sync::LazyLock;

    use hashbrown::HashMap;
    use parking_lot::Mutex;
    use winapi::shared::minwindef::{DWORD, FALSE, LPVOID};
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::jobapi2::{
        AssignProcessToJobObject, CreateJobObjectW, QueryInformationJobObject,
        SetInformationJobObject, TerminateJobObject,
    };
    use winapi::um::minwinbase::STILL_ACTIVE;
    use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess, TerminateProcess};
    use winapi::um::wincon::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
    use winapi::um::winnt::{
        HANDLE, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, JOBOBJECT_BASIC_ACCOUNTING_INFORMATION,
        JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectBasicAccountingInformation,
        JobObjectExtendedLimitInformation, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE,
    };

    use super::{KillSignal, ProcessTree, ProcessTreeTerminator, SystemTerminator};

    /// Job object holding every process a leader has started.
    struct Job(HANDLE);

    // SAFETY: job handles are process-wide kernel handles usable from any thread.
    #[allow(unsafe_code)]
    unsafe impl Send for Job {}

    impl Drop for Job {
        #[allow(unsafe_code)]
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    /// Jobs keyed by leader pid. An entry is dropped once its tree is dead or killed.
    static JOBS: LazyLock<Mutex<HashMap<u32, Job>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

    pub(super) fn resolve_pgid(pid: u32) -> u32 {
        pid
    }

    /// Put the freshly spawned leader in a kill-on-close job so its whole tree
    /// can be probed and terminated after the leader itself has exited.
    #[allow(unsafe_code)]
    pub(super) fn track_tree(process: RawHandle, tree: ProcessTree) -> io::Result<()> {
        unsafe {
            let handle = CreateJobObjectW(std::ptr::null_mut(), std::ptr::null());
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            let job = Job(handle);

            let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = mem::zeroed();
            limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            let configured = SetInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                &mut limits as *mut _ as LPVOID,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as DWORD,
            );
            if configured == 0 {
                return Err(io::Error::last_os_error());
            }
            if AssignProcessToJobObject(job.0, process as HANDLE) == 0 {
                return Err(io::Error::last_os_error());
            }
            JOBS.lock().insert(tree.pid, job);
        }
        Ok(())
    }

    #[allow(unsafe_code)]
    fn active_processes(job: &Job) -> Option<DWORD> {
        unsafe {
            let mut info: JOBOBJECT_BASIC_ACCOUNTING_INFORMATION = mem::zeroed();
            let queried = QueryInformationJobObject(
                job.0,
                JobObjectBasicAccountingInformation,
                &mut info as *mut _ as LPVOID,
                mem::size_of::<JOBOBJECT_BASIC_ACCOUNTING_INFORMATION>() as DWORD,
                std::ptr::null_mut(),
            );
            (queried != 0).then_some(info.ActiveProcesses)
        }
    }

    #[allow(unsafe_code)]
    fn leader_alive(pid: u32) -> bool {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid as DWORD);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: DWORD = 0;
            let queried = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            queried != 0 && exit_code == STILL_ACTIVE
        }
    }

    #[allow(unsafe_code)]
    fn terminate_process(pid: u32) -> io::Result<()> {
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, FALSE, pid as DWORD);
            if handle.is_null() {
                return Ok(());
            }
            let success = TerminateProcess(handle, 1);
            let err = io::Error::last_os_error();
            CloseHandle(handle);
            if success == 0 { Err(err) } else { Ok(()) }
        }
    }

    fn kill_untracked(tree: ProcessTree) -> io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &tree.pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => Ok(()),
            _ => terminate_process(tree.pid),
        }
    }

    impl ProcessTreeTerminator for SystemTerminator {
        #[allow(unsafe_code)]
        fn signal_tree(&self, tree: ProcessTree, signal: KillSignal) -> io::Result<()> {
            match signal {
                KillSignal::Term => {
                    // Requires CREATE_NEW_PROCESS_GROUP at spawn time.
                    if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, tree.pgid) } == 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                }
                KillSignal::Kill => {
                    let Some(job) = JOBS.lock().remove(&tree.pid) else {
                        return kill_untracked(tree);
                    };
                    if unsafe { TerminateJobObject(job.0, 1) } == 0 {
                        let err = io::Error::last_os_error();
                        // Closing the handle still kills the job.
                        drop(job);
                        return Err(err);
                    }
                    Ok(())
                }
            }
        }

        fn is_alive(&self, tree: ProcessTree) -> bool {
            let mut jobs = JOBS.lock();
            let Some(job) = jobs.get(&tree.pid) else {
                return leader_alive(tree.pid);
            };
            match active_processes(job) {
                Some(0) => {
                    jobs.remove(&tree.pid);
                    false
                }
                Some(_) => true,
                None => leader_alive(tree.pid),
            }
        }
    }
}

#[cfg(windows)]
use windows::resolve_pgid;

/// Make `command` spawn as the leader of a new console process group.
#[cfg(windows)]
pub fn configure_new_group(command: &mut tokio::process::Command) {
    command.creation_flags(winapi::um::winbase::CREATE_NEW_PROCESS_GROUP);
}

/// Record the spawned tree so later probes see every member, not just the leader.
///
/// On Unix the process group already does this. On Windows the leader joins a
/// job object; if that fails only the leader is tracked.
#[cfg(windows)]
pub fn track_tree(child: &tokio::process::Child, tree: ProcessTree) {
    let Some(process) = child.raw_handle() else {
        return;
    };
    if let Err(err) = windows::track_tree(process, tree) {
        tracing::warn!(%tree, error = %err, "failed to attach job object; tracking leader only");
    }
}

#[cfg(not(windows))]
pub fn track_tree(_child: &tokio::process::Child, _tree: ProcessTree) {}

#[cfg(not(any(unix, windows)))]
fn resolve_pgid(pid: u32) -> u32 {
    pid
}

#[cfg(not(any(unix, windows)))]
pub fn configure_new_group(_command: &mut tokio::process::Command) {}

#[cfg(not(any(unix, windows)))]
impl ProcessTreeTerminator for SystemTerminator {
    fn signal_tree(&self, _tree: ProcessTree, _signal: KillSignal) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process groups are not supported on this platform",
        ))
    }

    fn is_alive(&self, _tree: ProcessTree) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records signals; the tree "dies" on the first signal at or above `dies_on`.
    #[derive(Debug)]
    struct ScriptedTerminator {
        dies_on: Option<KillSignal>,
        alive: Mutex<bool>,
        sent: Mutex<Vec<KillSignal>>,
    }

    impl ScriptedTerminator {
        fn new(dies_on: Option<KillSignal>) -> Self {
            Self {
                dies_on,
                alive: Mutex::new(true),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessTreeTerminator for ScriptedTerminator {
        fn signal_tree(&self, _tree: ProcessTree, signal: KillSignal) -> io::Result<()> {
            self.sent.lock().push(signal);
            let dies = match (self.dies_on, signal) {
                (Some(KillSignal::Term), _) => true,
                (Some(KillSignal::Kill), KillSignal::Kill) => true,
                _ => false,
            };
            if dies {
                *self.alive.lock() = false;
            }
            Ok(())
        }

        fn is_alive(&self, _tree: ProcessTree) -> bool {
            *self.alive.lock()
        }
    }

    const TREE: ProcessTree = ProcessTree { pid: 42, pgid: 42 };

    #[test]
    fn cooperative_tree_exits_gracefully() {
        let terminator = ScriptedTerminator::new(Some(KillSignal::Term));
        let outcome = graceful_terminate(&terminator, TREE, Duration::from_millis(200));
        assert_eq!(outcome, EscalationOutcome::GracefulExit);
        assert_eq!(*terminator.sent.lock(), vec![KillSignal::Term]);
    }

    #[test]
    fn stubborn_tree_is_killed_after_grace() {
        let terminator = ScriptedTerminator::new(Some(KillSignal::Kill));
        let started = Instant::now();
        let outcome = graceful_terminate(&terminator, TREE, Duration::from_millis(50));
        assert_eq!(outcome, EscalationOutcome::ForcefulKill);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            *terminator.sent.lock(),
            vec![KillSignal::Term, KillSignal::Kill]
        );
    }

    #[test]
    fn dead_tree_is_not_signalled() {
        let terminator = ScriptedTerminator::new(None);
        *terminator.alive.lock() = false;
        let outcome = graceful_terminate(&terminator, TREE, Duration::from_millis(50));
        assert_eq!(outcome, EscalationOutcome::AlreadyExited);
        assert!(terminator.sent.lock().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_group_is_not_alive_and_signal_is_ok() {
        let tree = ProcessTree {
            pid: 2_000_000_000,
            pgid: 2_000_000_000,
        };
        assert!(!SystemTerminator.is_alive(tree));
        assert!(SystemTerminator.signal_tree(tree, KillSignal::Term).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn own_group_is_alive() {
        let pid = std::process::id();
        let tree = ProcessTree::for_leader(pid);
        assert!(SystemTerminator.is_alive(tree));
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn tree_outlives_its_leader_until_killed() -> io::Result<()> {
        let mut command = tokio::process::Command::new("cmd");
        command
            .args(["/C", "start", "/B", "ping", "-n", "30", "127.0.0.1"])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        configure_new_group(&mut command);
        let mut child = command.spawn()?;
        let tree = ProcessTree::for_leader(child.id().expect("pid"));
        track_tree(&child, tree);

        child.wait().await?;
        assert!(SystemTerminator.is_alive(tree), "background ping not tracked");

        SystemTerminator.signal_tree(tree, KillSignal::Kill)?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while SystemTerminator.is_alive(tree) && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        assert!(!SystemTerminator.is_alive(tree));
        Ok(())
    }
}
