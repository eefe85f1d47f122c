//! Concurrency-safe table of live supervised processes.
//!
//! An entry exists while its process tree may still be running. The lock is
//! only held for map operations; signalling and waiting happen on snapshots.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process_group::{
    self, EscalationOutcome, KillSignal, POLL_INTERVAL, ProcessTree, ProcessTreeTerminator,
};

/// Registry key for one spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One tracked process tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: HandleId,
    pub pid: u32,
    pub pgid: u32,
    pub started_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl ProcessHandle {
    pub fn tree(&self) -> ProcessTree {
        ProcessTree {
            pid: self.pid,
            pgid: self.pgid,
        }
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    handle: ProcessHandle,
    cancel: CancellationToken,
}

/// Per-handle outcome of a termination pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    pub outcomes: Vec<(HandleId, EscalationOutcome)>,
}

impl TerminationReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn count(&self, outcome: EscalationOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

#[derive(Debug)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<HandleId, RegistryEntry>>,
    next_id: AtomicU64,
    terminator: Arc<dyn ProcessTreeTerminator>,
    grace_period: Duration,
}

impl ProcessRegistry {
    pub fn new(terminator: Arc<dyn ProcessTreeTerminator>, grace_period: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            terminator,
            grace_period,
        }
    }

    /// Allocate a fresh handle id.
    pub fn next_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn terminator(&self) -> &Arc<dyn ProcessTreeTerminator> {
        &self.terminator
    }

    /// Track `handle`. Returns `false` and leaves the table untouched when the
    /// id is already present.
    pub fn register(&self, handle: ProcessHandle, cancel: CancellationToken) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&handle.id) {
            warn!(id = %handle.id, "duplicate registration ignored");
            return false;
        }
        debug!(id = %handle.id, pid = handle.pid, pgid = handle.pgid, "registered process");
        entries.insert(handle.id, RegistryEntry { handle, cancel });
        true
    }

    /// Stop tracking `id`. Absent ids are fine.
    pub fn unregister(&self, id: HandleId) -> Option<ProcessHandle> {
        let removed = self.entries.lock().remove(&id).map(|entry| entry.handle);
        if removed.is_some() {
            debug!(%id, "unregistered process");
        }
        removed
    }

    pub fn list_all(&self) -> Vec<HandleId> {
        let mut ids: Vec<HandleId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn snapshot(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<ProcessHandle> = self
            .entries
            .lock()
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_unstable_by_key(|handle| handle.id);
        handles
    }

    pub fn get(&self, id: HandleId) -> Option<ProcessHandle> {
        self.entries
            .lock()
            .get(&id)
            .map(|entry| entry.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cancel and group-kill one tracked process. Blocks for up to the grace
    /// period. The owning `run` removes the entry once it has reaped the child.
    pub fn terminate_one(&self, id: HandleId) -> Option<EscalationOutcome> {
        let entry = self.entries.lock().get(&id).cloned()?;
        entry.cancel.cancel();
        let outcome = process_group::graceful_terminate(
            self.terminator.as_ref(),
            entry.handle.tree(),
            self.grace_period,
        );
        info!(%id, pid = entry.handle.pid, ?outcome, "terminated process");
        Some(outcome)
    }

    /// Terminate every tracked process and clear them from the table.
    ///
    /// All groups get the graceful signal first and share one grace window;
    /// survivors are then killed. Individual failures do not stop the pass.
    pub fn terminate_all(&self) -> TerminationReport {
        let snapshot: Vec<RegistryEntry> = self.entries.lock().values().cloned().collect();
        if snapshot.is_empty() {
            return TerminationReport::default();
        }
        info!(count = snapshot.len(), "terminating all supervised processes");

        let mut pending: Vec<(HandleId, ProcessTree)> = Vec::with_capacity(snapshot.len());
        let mut report = TerminationReport::default();

        for entry in &snapshot {
            entry.cancel.cancel();
            let tree = entry.handle.tree();
            if !self.terminator.is_alive(tree) {
                report
                    .outcomes
                    .push((entry.handle.id, EscalationOutcome::AlreadyExited));
                continue;
            }
            match self.terminator.signal_tree(tree, KillSignal::Term) {
                Ok(()) => pending.push((entry.handle.id, tree)),
                Err(err) => {
                    warn!(id = %entry.handle.id, %tree, error = %err, "graceful signal failed");
                    pending.push((entry.handle.id, tree));
                }
            }
        }

        let deadline = Instant::now() + self.grace_period;
        while !pending.is_empty() && Instant::now() < deadline {
            pending.retain(|(id, tree)| {
                if self.terminator.is_alive(*tree) {
                    true
                } else {
                    report.outcomes.push((*id, EscalationOutcome::GracefulExit));
                    false
                }
            });
            if !pending.is_empty() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        for (id, tree) in pending {
            let outcome = match self.terminator.signal_tree(tree, KillSignal::Kill) {
                Ok(()) => EscalationOutcome::ForcefulKill,
                Err(err) => {
                    warn!(%id, %tree, error = %err, "forceful kill failed");
                    EscalationOutcome::Error
                }
            };
            report.outcomes.push((id, outcome));
        }

        {
            let mut entries = self.entries.lock();
            for entry in &snapshot {
                entries.remove(&entry.handle.id);
            }
        }

        report.outcomes.sort_unstable_by_key(|(id, _)| *id);
        info!(
            graceful = report.count(EscalationOutcome::GracefulExit),
            forced = report.count(EscalationOutcome::ForcefulKill),
            failed = report.count(EscalationOutcome::Error),
            "termination pass complete"
        );
        report
    }
}
