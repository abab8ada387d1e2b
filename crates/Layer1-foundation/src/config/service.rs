//! Service Config - agentd settings document
//!
//! One JSON document with a section per component. The global file is
//! loaded first and the project file is merged over it.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file name
pub const SERVICE_CONFIG_FILE: &str = "agentd.json";

// ============================================================================
// Service Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Schema version (for migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub security: SecuritySettings,
}

fn default_version() -> u32 {
    1
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + project merged load
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<ServiceConfig>(SERVICE_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<ServiceConfig>(SERVICE_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// Load a single explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        JsonStore::new(dir).load(filename)
    }

    /// Merge another config over this one. Merging is per field: a field
    /// the other document leaves at its default keeps this config's value.
    pub fn merge(&mut self, other: ServiceConfig) {
        if other.version > self.version {
            self.version = other.version;
        }
        self.pool.merge(other.pool);
        self.sandbox.merge(other.sandbox);
        self.security.merge(other.security);
    }
}

/// Take `value` unless it is the default
fn merge_field<T: PartialEq>(target: &mut T, value: T, default: T) {
    if value != default {
        *target = value;
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Maximum concurrently running agent processes
    pub max_workers: usize,
    /// Scheduler loop interval
    pub poll_interval_ms: u64,
    /// Task timeout when the request does not carry one
    pub default_timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL during drain
    pub drain_grace_secs: u64,
    /// External agent command
    pub agent: AgentCommandSettings,
}

impl PoolSettings {
    fn merge(&mut self, other: PoolSettings) {
        let d = PoolSettings::default();
        merge_field(&mut self.max_workers, other.max_workers, d.max_workers);
        merge_field(&mut self.poll_interval_ms, other.poll_interval_ms, d.poll_interval_ms);
        merge_field(
            &mut self.default_timeout_secs,
            other.default_timeout_secs,
            d.default_timeout_secs,
        );
        merge_field(&mut self.drain_grace_secs, other.drain_grace_secs, d.drain_grace_secs);
        // The agent invocation is one unit
        merge_field(&mut self.agent, other.agent, d.agent);
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 50,
            default_timeout_secs: 600,
            drain_grace_secs: 5,
            agent: AgentCommandSettings::default(),
        }
    }
}

/// External agent CLI invocation.
///
/// `{model}` in `args` is replaced with the request's model identifier. The
/// prompt is fed on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentCommandSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AgentCommandSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
                "--model".to_string(),
                "{model}".to_string(),
            ],
        }
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// Sandbox defaults applied when `create_sandbox` gets no explicit config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    pub image: String,
    /// Host directory holding sandbox workspaces
    pub workspace_base: Option<PathBuf>,
    /// CPU quota in cores
    pub cpu_quota: f64,
    pub memory_mb: u64,
    pub memory_swap_mb: u64,
    pub pids_limit: u32,
    pub workspace_size_mb: u64,
    pub timeout_secs: u64,
    pub network_enabled: bool,
    /// Non-privileged identity used for exec
    pub user: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            workspace_base: None,
            cpu_quota: 1.0,
            memory_mb: 512,
            memory_swap_mb: 512,
            pids_limit: 128,
            workspace_size_mb: 1024,
            timeout_secs: 300,
            network_enabled: false,
            user: "1000:1000".to_string(),
        }
    }
}

impl SandboxSettings {
    fn merge(&mut self, other: SandboxSettings) {
        let d = SandboxSettings::default();
        merge_field(&mut self.image, other.image, d.image);
        merge_field(&mut self.workspace_base, other.workspace_base, d.workspace_base);
        merge_field(&mut self.cpu_quota, other.cpu_quota, d.cpu_quota);
        merge_field(&mut self.memory_mb, other.memory_mb, d.memory_mb);
        merge_field(&mut self.memory_swap_mb, other.memory_swap_mb, d.memory_swap_mb);
        merge_field(&mut self.pids_limit, other.pids_limit, d.pids_limit);
        merge_field(&mut self.workspace_size_mb, other.workspace_size_mb, d.workspace_size_mb);
        merge_field(&mut self.timeout_secs, other.timeout_secs, d.timeout_secs);
        merge_field(&mut self.network_enabled, other.network_enabled, d.network_enabled);
        merge_field(&mut self.user, other.user, d.user);
    }

    /// Resolved host directory for workspaces
    pub fn workspace_base(&self) -> PathBuf {
        self.workspace_base
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("agentd-sandboxes"))
    }
}

// ============================================================================
// Security
// ============================================================================

/// Prefixes the path policy confines access to, as seen inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    pub workspace_root: PathBuf,
    pub project_root: PathBuf,
}

impl SecuritySettings {
    fn merge(&mut self, other: SecuritySettings) {
        let d = SecuritySettings::default();
        merge_field(&mut self.workspace_root, other.workspace_root, d.workspace_root);
        merge_field(&mut self.project_root, other.project_root, d.project_root);
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/workspace"),
            project_root: PathBuf::from("/project"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::new();
        assert_eq!(config.version, 1);
        assert_eq!(config.pool.max_workers, 4);
        assert_eq!(config.pool.drain_grace_secs, 5);
        assert!(!config.sandbox.network_enabled);
        assert_eq!(config.security.workspace_root, PathBuf::from("/workspace"));
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{ "pool": { "maxWorkers": 2 } }"#).unwrap();
        assert_eq!(config.pool.max_workers, 2);
        assert_eq!(config.pool.poll_interval_ms, 50);
        assert_eq!(config.sandbox, SandboxSettings::default());
    }

    #[test]
    fn test_merge_prefers_non_default_sections() {
        let mut base = ServiceConfig::new();
        base.pool.max_workers = 8;

        let mut project = ServiceConfig::new();
        project.sandbox.network_enabled = true;

        base.merge(project);
        assert_eq!(base.pool.max_workers, 8);
        assert!(base.sandbox.network_enabled);
    }

    #[test]
    fn test_merge_keeps_fields_the_override_leaves_default() {
        let mut global: ServiceConfig = serde_json::from_str(
            r#"{ "pool": { "maxWorkers": 8 }, "sandbox": { "memoryMb": 1024, "user": "2000:2000" } }"#,
        )
        .unwrap();
        let project: ServiceConfig = serde_json::from_str(
            r#"{ "pool": { "pollIntervalMs": 20 }, "sandbox": { "networkEnabled": true } }"#,
        )
        .unwrap();

        global.merge(project);
        assert_eq!(global.pool.max_workers, 8);
        assert_eq!(global.pool.poll_interval_ms, 20);
        assert_eq!(global.sandbox.memory_mb, 1024);
        assert_eq!(global.sandbox.user, "2000:2000");
        assert!(global.sandbox.network_enabled);
        assert_eq!(global.security, SecuritySettings::default());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{ "sandbox": { "memoryMb": 256 } }"#).unwrap();

        let config = ServiceConfig::load_from(&path).unwrap();
        assert_eq!(config.sandbox.memory_mb, 256);
    }
}
