use anyhow::{Context, Result};
use cmdward_exec::{DenialReason, PolicyDecision, ProcessSupervisor};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CheckEntry<'a> {
    program: &'a str,
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_seconds: Option<u64>,
}

impl<'a> CheckEntry<'a> {
    fn new(program: &'a str, supervisor: &ProcessSupervisor) -> Self {
        let (decision, reason) = describe(supervisor.classify(program));
        let timeout_seconds = (decision == "allow")
            .then(|| supervisor.policy().resolve_timeout(program).as_secs());
        Self {
            program,
            decision,
            reason,
            timeout_seconds,
        }
    }
}

fn describe(decision: PolicyDecision) -> (&'static str, Option<&'static str>) {
    match decision {
        PolicyDecision::Allow => ("allow", None),
        PolicyDecision::BuiltinDefer => ("builtin", None),
        PolicyDecision::Deny(DenialReason::DenyList) => ("deny", Some("deny list")),
        PolicyDecision::Deny(DenialReason::NotAllowed) => ("deny", Some("not on the allow list")),
        PolicyDecision::Deny(DenialReason::Builtin) => ("deny", Some("built-in")),
    }
}

/// Print the policy decision for each program. Always succeeds; this is a query.
pub fn handle_check_command(
    supervisor: &ProcessSupervisor,
    programs: &[String],
    json: bool,
) -> Result<i32> {
    let entries: Vec<CheckEntry<'_>> = programs
        .iter()
        .map(|program| CheckEntry::new(program, supervisor))
        .collect();

    if json {
        let payload =
            serde_json::to_string_pretty(&entries).context("Failed to serialize check results")?;
        println!("{payload}");
        return Ok(0);
    }

    for entry in &entries {
        match (entry.reason, entry.timeout_seconds) {
            (Some(reason), _) => println!("{}: {} ({reason})", entry.program, entry.decision),
            (None, Some(secs)) => println!("{}: {} (timeout {secs}s)", entry.program, entry.decision),
            (None, None) => println!("{}: {}", entry.program, entry.decision),
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdward_exec::{ExecutionPolicy, OutputSanitizer};
    use std::time::Duration;

    fn supervisor() -> ProcessSupervisor {
        let policy = ExecutionPolicy::new(Duration::from_secs(30), Duration::from_millis(500))
            .allow(["ls", "curl"])
            .deny(["rm"])
            .builtins(["cd"])
            .timeout_for("curl", Duration::from_secs(60));
        ProcessSupervisor::new(policy, OutputSanitizer::new(1_000))
    }

    #[test]
    fn entries_describe_each_decision() {
        let supervisor = supervisor();
        let curl = CheckEntry::new("curl", &supervisor);
        assert_eq!(curl.decision, "allow");
        assert_eq!(curl.timeout_seconds, Some(60));

        let rm = CheckEntry::new("/bin/rm", &supervisor);
        assert_eq!(rm.decision, "deny");
        assert_eq!(rm.reason, Some("deny list"));

        let cd = CheckEntry::new("cd", &supervisor);
        assert_eq!(cd.decision, "builtin");
        assert_eq!(cd.timeout_seconds, None);

        let other = CheckEntry::new("nmap", &supervisor);
        assert_eq!(other.reason, Some("not on the allow list"));
    }
}
