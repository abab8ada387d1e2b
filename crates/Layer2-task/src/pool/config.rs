//! Worker pool configuration

use agentd_foundation::{AgentCommandSettings, PoolSettings};
use std::time::Duration;

/// Placeholder replaced with the request's model in agent arguments
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum concurrently running agent processes (at least 1)
    pub max_workers: usize,

    /// Scheduler tick; also the `get_result` polling interval
    pub poll_interval: Duration,

    /// Timeout for requests that do not carry one
    pub default_timeout: Duration,

    /// SIGTERM to SIGKILL grace during drain
    pub drain_grace: Duration,

    /// External agent command
    pub agent: AgentCommand,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for WorkerPoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_workers: settings.max_workers.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            default_timeout: Duration::from_secs(settings.default_timeout_secs),
            drain_grace: Duration::from_secs(settings.drain_grace_secs),
            agent: AgentCommand::from(&settings.agent),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn with_agent(mut self, agent: AgentCommand) -> Self {
        self.agent = agent;
        self
    }
}

/// Program and argument template for the agent CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `sh -c <script>`; handy for wiring arbitrary agent shims
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()])
    }

    /// Arguments with the model placeholder substituted
    pub fn args_for(&self, model: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, model))
            .collect()
    }
}

impl From<&AgentCommandSettings> for AgentCommand {
    fn from(settings: &AgentCommandSettings) -> Self {
        Self::new(settings.program.clone(), settings.args.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = PoolSettings {
            max_workers: 0,
            ..Default::default()
        };
        let config = WorkerPoolConfig::from(&settings);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.drain_grace, Duration::from_secs(5));
        assert_eq!(config.agent.program, "claude");
    }

    #[test]
    fn test_model_placeholder_substitution() {
        let agent = AgentCommand::from(&AgentCommandSettings::default());
        let args = agent.args_for("claude-sonnet-4");
        assert_eq!(args.last().map(String::as_str), Some("claude-sonnet-4"));
        assert!(!args.iter().any(|a| a.contains(MODEL_PLACEHOLDER)));
    }
}
