//! Sandbox configuration

use agentd_foundation::SandboxSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Per-sandbox resource and network limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// CPU quota in cores (e.g. 1.5)
    pub cpu_quota: f64,
    pub memory_bytes: u64,
    pub memory_swap_bytes: u64,
    pub pids_limit: u32,
    /// Soft workspace quota; see `SandboxManager::workspace_over_quota`
    pub workspace_size_bytes: u64,
    /// Default per-command timeout
    pub timeout: Duration,
    pub network_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            cpu_quota: settings.cpu_quota,
            memory_bytes: settings.memory_mb * MIB,
            memory_swap_bytes: settings.memory_swap_mb.max(settings.memory_mb) * MIB,
            pids_limit: settings.pids_limit,
            workspace_size_bytes: settings.workspace_size_mb * MIB,
            timeout: Duration::from_secs(settings.timeout_secs),
            network_enabled: settings.network_enabled,
        }
    }
}

impl SandboxConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    /// CPU quota in billionths of a core, as the engine expects
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_quota * 1_000_000_000.0) as i64
    }
}

/// Manager-wide settings
#[derive(Debug, Clone)]
pub struct SandboxManagerConfig {
    pub image: String,
    /// Host directory holding per-sandbox workspaces
    pub workspace_base: PathBuf,
    /// Non-privileged identity for every exec
    pub user: String,
    /// Limits used when `create_sandbox` gets none
    pub defaults: SandboxConfig,
    /// Container environment; credential-like names are stripped at creation
    pub env: HashMap<String, String>,
}

impl Default for SandboxManagerConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for SandboxManagerConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            image: settings.image.clone(),
            workspace_base: settings.workspace_base(),
            user: settings.user.clone(),
            defaults: SandboxConfig::from(settings),
            env: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_converts_units() {
        let config = SandboxConfig::from(&SandboxSettings::default());
        assert_eq!(config.memory_bytes, 512 * MIB);
        assert_eq!(config.pids_limit, 128);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(!config.network_enabled);
        assert_eq!(config.nano_cpus(), 1_000_000_000);
    }

    #[test]
    fn test_swap_never_below_memory() {
        let settings = SandboxSettings {
            memory_mb: 1024,
            memory_swap_mb: 0,
            ..Default::default()
        };
        let config = SandboxConfig::from(&settings);
        assert_eq!(config.memory_swap_bytes, config.memory_bytes);
    }
}
