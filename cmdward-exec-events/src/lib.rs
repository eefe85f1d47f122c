//! Structured execution events emitted by the cmdward supervisor.
//!
//! This crate exposes the serialized schema for command lifecycle updates,
//! policy denials, spawn failures and bookkeeping anomalies. Downstream
//! applications can deserialize these structures to drive audit logs or
//! dashboards without depending on the process-management crate itself.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic version of the serialized event schema exported by this crate.
pub const EVENT_SCHEMA_VERSION: &str = "0.1.0";

/// Wraps an [`ExecEvent`] with schema metadata so downstream consumers can
/// negotiate compatibility before processing an event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedExecEvent {
    /// Semantic version describing the schema of the nested event payload.
    pub schema_version: String,
    /// Concrete event emitted by the supervisor.
    pub event: ExecEvent,
}

impl VersionedExecEvent {
    /// Creates a new [`VersionedExecEvent`] using the current
    /// [`EVENT_SCHEMA_VERSION`].
    pub fn new(event: ExecEvent) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            event,
        }
    }

    /// Returns the nested [`ExecEvent`], consuming the wrapper.
    pub fn into_event(self) -> ExecEvent {
        self.event
    }
}

impl From<ExecEvent> for VersionedExecEvent {
    fn from(event: ExecEvent) -> Self {
        Self::new(event)
    }
}

/// Sink for processing [`ExecEvent`] instances.
///
/// Emitters are shared between concurrently running commands, so they take
/// `&self` and must be thread-safe. Emission is fire-and-forget.
pub trait EventEmitter: Send + Sync {
    /// Invoked for each event emitted by the supervisor.
    fn emit(&self, event: &ExecEvent);
}

impl<F> EventEmitter for F
where
    F: Fn(&ExecEvent) + Send + Sync,
{
    fn emit(&self, event: &ExecEvent) {
        self(event);
    }
}

/// Emitter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &ExecEvent) {}
}

/// JSON helper utilities for serializing and deserializing events.
#[cfg(feature = "serde-json")]
pub mod json {
    use super::{ExecEvent, VersionedExecEvent};

    /// Converts an event into a `serde_json::Value`.
    pub fn to_value(event: &ExecEvent) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(event)
    }

    /// Serializes an event into a JSON string.
    pub fn to_string(event: &ExecEvent) -> serde_json::Result<String> {
        serde_json::to_string(event)
    }

    /// Deserializes an event from a JSON string.
    pub fn from_str(payload: &str) -> serde_json::Result<ExecEvent> {
        serde_json::from_str(payload)
    }

    /// Serializes a [`VersionedExecEvent`] wrapper.
    pub fn versioned_to_string(event: &ExecEvent) -> serde_json::Result<String> {
        serde_json::to_string(&VersionedExecEvent::new(event.clone()))
    }

    /// Deserializes a [`VersionedExecEvent`] wrapper.
    pub fn versioned_from_str(payload: &str) -> serde_json::Result<VersionedExecEvent> {
        serde_json::from_str(payload)
    }
}

#[cfg(feature = "telemetry-tracing")]
mod tracing_support {
    use tracing::Level;

    use super::{EVENT_SCHEMA_VERSION, EventEmitter, ExecEvent};

    /// Emits structured events as `tracing` events at the specified level.
    #[derive(Debug, Clone)]
    pub struct TracingEmitter {
        level: Level,
    }

    impl TracingEmitter {
        /// Creates a new [`TracingEmitter`] with the provided [`Level`].
        pub fn new(level: Level) -> Self {
            Self { level }
        }
    }

    impl Default for TracingEmitter {
        fn default() -> Self {
            Self { level: Level::INFO }
        }
    }

    impl EventEmitter for TracingEmitter {
        fn emit(&self, event: &ExecEvent) {
            let kind = event.kind();
            let payload = serde_json::to_string(event)
                .unwrap_or_else(|err| format!("{{\"unserializable\":\"{err}\"}}"));
            match self.level {
                Level::TRACE => tracing::event!(
                    target: "cmdward_exec_events",
                    Level::TRACE,
                    schema_version = EVENT_SCHEMA_VERSION,
                    kind,
                    event = %payload,
                    "cmdward_exec_event"
                ),
                Level::DEBUG => tracing::event!(
                    target: "cmdward_exec_events",
                    Level::DEBUG,
                    schema_version = EVENT_SCHEMA_VERSION,
                    kind,
                    event = %payload,
                    "cmdward_exec_event"
                ),
                Level::INFO => tracing::event!(
                    target: "cmdward_exec_events",
                    Level::INFO,
                    schema_version = EVENT_SCHEMA_VERSION,
                    kind,
                    event = %payload,
                    "cmdward_exec_event"
                ),
                Level::WARN => tracing::event!(
                    target: "cmdward_exec_events",
                    Level::WARN,
                    schema_version = EVENT_SCHEMA_VERSION,
                    kind,
                    event = %payload,
                    "cmdward_exec_event"
                ),
                Level::ERROR => tracing::event!(
                    target: "cmdward_exec_events",
                    Level::ERROR,
                    schema_version = EVENT_SCHEMA_VERSION,
                    kind,
                    event = %payload,
                    "cmdward_exec_event"
                ),
            }
        }
    }
}

#[cfg(feature = "telemetry-tracing")]
pub use tracing_support::TracingEmitter;

/// Structured events emitted while supervising external commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ExecEvent {
    /// A process was spawned and registered.
    #[serde(rename = "command.started")]
    CommandStarted(CommandStartedEvent),
    /// A process exited on its own before its deadline.
    #[serde(rename = "command.completed")]
    CommandCompleted(CommandCompletedEvent),
    /// A process outlived its deadline and was escalated.
    #[serde(rename = "command.timed_out")]
    CommandTimedOut(CommandTimedOutEvent),
    /// A process was stopped by cancellation or shutdown.
    #[serde(rename = "command.terminated")]
    CommandTerminated(CommandTerminatedEvent),
    /// The policy refused to spawn a program.
    #[serde(rename = "policy.denied")]
    PolicyDenied(PolicyDeniedEvent),
    /// The operating system refused to spawn a program.
    #[serde(rename = "spawn.failed")]
    SpawnFailed(SpawnFailedEvent),
    /// Process bookkeeping disagreed with the supervisor's expectations.
    #[serde(rename = "registry.inconsistent")]
    RegistryInconsistent(RegistryInconsistentEvent),
}

impl ExecEvent {
    /// Stable string tag for the event variant (matches the serialized `type`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommandStarted(_) => "command.started",
            Self::CommandCompleted(_) => "command.completed",
            Self::CommandTimedOut(_) => "command.timed_out",
            Self::CommandTerminated(_) => "command.terminated",
            Self::PolicyDenied(_) => "policy.denied",
            Self::SpawnFailed(_) => "spawn.failed",
            Self::RegistryInconsistent(_) => "registry.inconsistent",
        }
    }

    /// Identifier of the `run` call that produced this event, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::CommandStarted(e) => Some(e.run_id),
            Self::CommandCompleted(e) => Some(e.run_id),
            Self::CommandTimedOut(e) => Some(e.run_id),
            Self::CommandTerminated(e) => Some(e.run_id),
            Self::PolicyDenied(e) => Some(e.run_id),
            Self::SpawnFailed(e) => Some(e.run_id),
            Self::RegistryInconsistent(_) => None,
        }
    }

    /// Time at which the event was recorded.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::CommandStarted(e) => e.timestamp,
            Self::CommandCompleted(e) => e.timestamp,
            Self::CommandTimedOut(e) => e.timestamp,
            Self::CommandTerminated(e) => e.timestamp,
            Self::PolicyDenied(e) => e.timestamp,
            Self::SpawnFailed(e) => e.timestamp,
            Self::RegistryInconsistent(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandStartedEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Program as requested (argument zero).
    pub program: String,
    /// Remaining arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// OS process id of the spawned child.
    pub pid: u32,
    /// Process group the child leads.
    pub process_group: u32,
    /// Directory the child was started in.
    pub working_dir: PathBuf,
    /// Deadline applied to the run, in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandCompletedEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub program: String,
    /// Exit code reported by the process (signal deaths are mapped to 128+N).
    pub exit_code: i32,
    /// Wall-clock time between spawn and reap.
    pub duration_ms: u64,
    /// Whether either captured stream was truncated.
    #[serde(default)]
    pub truncated: bool,
}

/// How a graceful-then-forceful escalation ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// The group exited within the grace period after the graceful signal.
    GracefulExit,
    /// The group had to be killed forcefully.
    ForcefulKill,
    /// Nothing was left running when escalation began.
    AlreadyExited,
    /// Signalling failed; the group may still be alive.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTimedOutEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub program: String,
    pub timeout_ms: u64,
    pub escalation: EscalationOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The caller cancelled the request.
    Cancelled,
    /// The supervisor was shutting down or the registry terminated the entry.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTerminatedEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub program: String,
    pub reason: TerminationReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The basename appears in the deny-set.
    DenyList,
    /// The basename is in neither set.
    NotAllowed,
    /// The basename is an interactive built-in that must not be spawned.
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDeniedEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub program: String,
    pub reason: DenialReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpawnFailureKind {
    NotFound,
    PermissionDenied,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpawnFailedEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub program: String,
    pub kind: SpawnFailureKind,
    /// OS error text.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryInconsistentEvent {
    pub timestamp: DateTime<Utc>,
    /// Registry handle id involved.
    pub handle_id: u64,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn denied() -> ExecEvent {
        ExecEvent::PolicyDenied(PolicyDeniedEvent {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            program: "rm".to_string(),
            reason: DenialReason::DenyList,
        })
    }

    #[test]
    fn serialized_type_tag_matches_kind() {
        let event = denied();
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], event.kind());
        assert_eq!(value["reason"], "deny_list");
    }

    #[test]
    fn versioned_event_wraps_schema_version() {
        let event = denied();

        let versioned = VersionedExecEvent::new(event.clone());

        assert_eq!(versioned.schema_version, EVENT_SCHEMA_VERSION);
        assert_eq!(versioned.event, event);
        assert_eq!(versioned.into_event(), event);
    }

    #[cfg(feature = "serde-json")]
    #[test]
    fn versioned_json_round_trip() {
        let event = ExecEvent::CommandTimedOut(CommandTimedOutEvent {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            program: "sleep".to_string(),
            timeout_ms: 1_000,
            escalation: EscalationOutcome::ForcefulKill,
        });

        let payload = crate::json::versioned_to_string(&event).expect("serialize");
        let restored = crate::json::versioned_from_str(&payload).expect("deserialize");

        assert_eq!(restored.schema_version, EVENT_SCHEMA_VERSION);
        assert_eq!(restored.event, event);
    }

    #[test]
    fn closures_act_as_emitters() {
        let seen = Mutex::new(Vec::new());
        let emitter = |event: &ExecEvent| {
            if let Ok(mut guard) = seen.lock() {
                guard.push(event.kind());
            }
        };

        emitter.emit(&denied());
        NoopEmitter.emit(&denied());

        assert_eq!(*seen.lock().expect("lock"), vec!["policy.denied"]);
    }

    #[test]
    fn registry_events_have_no_run_id() {
        let event = ExecEvent::RegistryInconsistent(RegistryInconsistentEvent {
            timestamp: Utc::now(),
            handle_id: 7,
            detail: "unregistered twice".to_string(),
        });
        assert!(event.run_id().is_none());
    }
}
