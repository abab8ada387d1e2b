//! Container sandboxes
//!
//! - `SandboxManager` - lifecycle, policy-gated exec, workspace introspection
//! - `ContainerEngine` - engine seam, `DockerEngine` on bollard
//! - `ContainerSpec` - engine-neutral description of one sandbox container

mod config;
mod engine;
mod manager;
mod spec;
mod workspace;

pub use config::{SandboxConfig, SandboxManagerConfig};
pub use engine::{ContainerEngine, DockerEngine, ExecOutput, ExecRequest, ManagedContainer};
pub use manager::{FileOperation, Sandbox, SandboxManager};
pub use spec::{
    ContainerSpec, NetworkMode, SecurityProfile, VolumeMount, LABEL_CREATED_AT, LABEL_MANAGED,
    LABEL_TASK_ID, LABEL_WORKSPACE, PROJECT_MOUNT, SCRATCH_TMPFS_BYTES, WORKSPACE_MOUNT,
};
