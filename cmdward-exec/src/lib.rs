//! Supervised execution of external commands.
//!
//! A [`ProcessSupervisor`] checks each [`CommandRequest`] against an
//! allow/deny [`ExecutionPolicy`], spawns allowed programs as the leaders of
//! their own process groups, tracks them in a [`ProcessRegistry`], and returns
//! an [`ExecutionResult`] with bounded output once the command exits, times
//! out, or is cancelled. Timeouts and shutdown escalate from a graceful signal
//! to a forceful kill of the whole group.

pub mod error;
pub mod pipe;
pub mod policy;
pub mod process_group;
pub mod registry;
pub mod request;
pub mod result;
pub mod sanitizer;
pub mod supervisor;

pub use cmdward_exec_events::DenialReason;
pub use error::{
    ExecError, FailureKind, GENERIC_FAILURE_EXIT_CODE, NOT_FOUND_EXIT_CODE,
    PERMISSION_DENIED_EXIT_CODE, TERMINATED_EXIT_CODE, TIMEOUT_EXIT_CODE,
};
pub use policy::{ExecutionPolicy, PolicyDecision, PolicyGuard, normalize_program};
pub use process_group::{
    EscalationOutcome, KillSignal, ProcessTree, ProcessTreeTerminator, SystemTerminator,
};
pub use registry::{HandleId, ProcessHandle, ProcessRegistry, TerminationReport};
pub use request::CommandRequest;
pub use result::ExecutionResult;
pub use sanitizer::{OutputSanitizer, Sanitized, TRUNCATION_MARKER};
pub use supervisor::ProcessSupervisor;
