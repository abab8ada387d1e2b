//! Engine-neutral container description

use super::config::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Mount point of the writable workspace inside every sandbox
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Mount point of the read-only project checkout
pub const PROJECT_MOUNT: &str = "/project";

/// Size cap of the in-container `/tmp`
pub const SCRATCH_TMPFS_BYTES: u64 = 64 * 1024 * 1024;

// ============================================================================
// Labels
// ============================================================================

pub const LABEL_MANAGED: &str = "agentd.managed";
pub const LABEL_TASK_ID: &str = "agentd.task_id";
pub const LABEL_WORKSPACE: &str = "agentd.workspace";
pub const LABEL_CREATED_AT: &str = "agentd.created_at";

// ============================================================================
// Spec
// ============================================================================

/// Network mode for container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    /// No network access
    None,
    /// Bridge network (default Docker)
    Bridge,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Bridge => "bridge",
        }
    }
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `host:container[:ro]` bind syntax
    pub fn bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Security profile for container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    /// Capabilities dropped at creation
    pub drop_caps: Vec<String>,
    pub no_new_privileges: bool,
    pub read_only_root: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            drop_caps: vec!["ALL".to_string()],
            no_new_privileges: true,
            read_only_root: true,
        }
    }
}

impl SecurityProfile {
    pub fn security_opts(&self) -> Vec<String> {
        if self.no_new_privileges {
            vec!["no-new-privileges:true".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Everything an engine needs to create one sandbox container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Long-running keepalive; work arrives through exec
    pub command: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub env: HashMap<String, String>,
    pub mounts: Vec<VolumeMount>,
    pub limits: SandboxConfig,
    pub network: NetworkMode,
    pub security: SecurityProfile,
    pub scratch_tmpfs_bytes: u64,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, limits: SandboxConfig) -> Self {
        let network = if limits.network_enabled {
            NetworkMode::Bridge
        } else {
            NetworkMode::None
        };
        Self {
            name: name.into(),
            image: image.into(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            working_dir: WORKSPACE_MOUNT.to_string(),
            user: "1000:1000".to_string(),
            env: HashMap::new(),
            mounts: Vec::new(),
            limits,
            network,
            security: SecurityProfile::default(),
            scratch_tmpfs_bytes: SCRATCH_TMPFS_BYTES,
            labels: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `KEY=VALUE` pairs, sorted for stable output
    pub fn env_list(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();
        env
    }

    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(VolumeMount::bind).collect()
    }

    /// tmpfs options for `/tmp`
    pub fn tmpfs(&self) -> HashMap<String, String> {
        HashMap::from([(
            "/tmp".to_string(),
            format!("rw,noexec,nosuid,size={}", self.scratch_tmpfs_bytes),
        )])
    }
}
