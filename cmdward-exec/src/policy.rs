use std::sync::Arc;
use std::time::Duration;

use cmdward_config::CmdwardConfig;
use cmdward_exec_events::DenialReason;
use hashbrown::{HashMap, HashSet};
use tracing::warn;

/// Static allow/deny tables and deadlines for one supervisor.
///
/// Program names are stored as lowercase basenames; lookups normalise the
/// same way, so `/usr/bin/LS` matches `ls`.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    allow: HashSet<String>,
    deny: HashSet<String>,
    builtins: HashSet<String>,
    per_command: HashMap<String, Duration>,
    default_timeout: Duration,
    grace_period: Duration,
}

impl ExecutionPolicy {
    /// Empty policy: everything is denied until names are allowed.
    pub fn new(default_timeout: Duration, grace_period: Duration) -> Self {
        Self {
            allow: HashSet::new(),
            deny: HashSet::new(),
            builtins: HashSet::new(),
            per_command: HashMap::new(),
            default_timeout,
            grace_period,
        }
    }

    pub fn from_config(config: &CmdwardConfig) -> Self {
        let mut policy = Self::new(
            config.timeouts.default_timeout(),
            config.timeouts.grace_period(),
        )
        .allow(&config.commands.allow_list)
        .deny(&config.commands.deny_list)
        .builtins(&config.commands.builtins);

        for (name, secs) in &config.timeouts.per_command {
            policy = policy.timeout_for(name, Duration::from_secs(*secs));
        }
        policy
    }

    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allow
            .extend(names.into_iter().map(|n| normalize_program(n.as_ref())));
        self
    }

    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.deny
            .extend(names.into_iter().map(|n| normalize_program(n.as_ref())));
        self
    }

    pub fn builtins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.builtins
            .extend(names.into_iter().map(|n| normalize_program(n.as_ref())));
        self
    }

    pub fn timeout_for(mut self, name: &str, timeout: Duration) -> Self {
        self.per_command.insert(normalize_program(name), timeout);
        self
    }

    /// Per-command entry if present, else the default.
    pub fn resolve_timeout(&self, program: &str) -> Duration {
        self.per_command
            .get(&normalize_program(program))
            .copied()
            .unwrap_or(self.default_timeout)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_builtin(&self, program: &str) -> bool {
        self.builtins.contains(&normalize_program(program))
    }
}

/// Lowercase basename of `program`, accepting both `/` and `\` separators.
pub fn normalize_program(program: &str) -> String {
    let trimmed = program.trim();
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    base.to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(DenialReason),
    /// Handled by the caller's own built-in dispatcher; never spawned.
    BuiltinDefer,
}

/// Classifies program names against an [`ExecutionPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    policy: Arc<ExecutionPolicy>,
}

impl PolicyGuard {
    pub fn new(policy: Arc<ExecutionPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn evaluate(&self, program: &str) -> PolicyDecision {
        let name = normalize_program(program);
        if name.is_empty() {
            warn!(program, "refusing to evaluate an empty program name");
            return PolicyDecision::Deny(DenialReason::NotAllowed);
        }

        if self.policy.deny.contains(&name) {
            warn!(program, basename = %name, "command is on the deny list");
            return PolicyDecision::Deny(DenialReason::DenyList);
        }
        if self.policy.allow.contains(&name) {
            return PolicyDecision::Allow;
        }
        if self.policy.builtins.contains(&name) {
            return PolicyDecision::BuiltinDefer;
        }

        warn!(program, basename = %name, "command is not on the allow list");
        PolicyDecision::Deny(DenialReason::NotAllowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PolicyGuard {
        let policy = ExecutionPolicy::new(Duration::from_secs(30), Duration::from_millis(500))
            .allow(["ls", "git", "rm", "Python3"])
            .deny(["rm", "sudo"])
            .builtins(["cd", "pwd"])
            .timeout_for("curl", Duration::from_secs(60));
        PolicyGuard::new(Arc::new(policy))
    }

    #[test]
    fn deny_wins_over_allow() {
        assert_eq!(
            guard().evaluate("rm"),
            PolicyDecision::Deny(DenialReason::DenyList)
        );
        assert_eq!(
            guard().evaluate("/bin/rm"),
            PolicyDecision::Deny(DenialReason::DenyList)
        );
    }

    #[test]
    fn basenames_match_case_insensitively() {
        let guard = guard();
        assert_eq!(guard.evaluate("/usr/bin/LS"), PolicyDecision::Allow);
        assert_eq!(guard.evaluate("python3"), PolicyDecision::Allow);
        assert_eq!(guard.evaluate(r"C:\Tools\Git"), PolicyDecision::Allow);
        assert_eq!(
            guard.evaluate("SUDO"),
            PolicyDecision::Deny(DenialReason::DenyList)
        );
    }

    #[test]
    fn builtins_defer_and_unknown_names_deny() {
        let guard = guard();
        assert_eq!(guard.evaluate("cd"), PolicyDecision::BuiltinDefer);
        assert_eq!(
            guard.evaluate("nc"),
            PolicyDecision::Deny(DenialReason::NotAllowed)
        );
        assert_eq!(
            guard.evaluate(""),
            PolicyDecision::Deny(DenialReason::NotAllowed)
        );
    }

    #[test]
    fn per_command_timeout_overrides_default() {
        let guard = guard();
        assert_eq!(
            guard.policy().resolve_timeout("/usr/bin/curl"),
            Duration::from_secs(60)
        );
        assert_eq!(guard.policy().resolve_timeout("ls"), Duration::from_secs(30));
    }

    #[test]
    fn default_config_policy_denies_destructive_tools() {
        let policy = ExecutionPolicy::from_config(&CmdwardConfig::default());
        let guard = PolicyGuard::new(Arc::new(policy));
        assert_eq!(guard.evaluate("ls"), PolicyDecision::Allow);
        assert_eq!(
            guard.evaluate("rm"),
            PolicyDecision::Deny(DenialReason::DenyList)
        );
        assert_eq!(guard.evaluate("pwd"), PolicyDecision::BuiltinDefer);
        assert_eq!(
            guard.policy().resolve_timeout("tar"),
            Duration::from_secs(120)
        );
    }
}
