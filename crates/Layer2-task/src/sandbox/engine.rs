//! Container engine seam
//!
//! `SandboxManager` talks to containers only through `ContainerEngine`.
//! `DockerEngine` is the production implementation on bollard.

use super::spec::ContainerSpec;
use agentd_foundation::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// One command to run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub user: String,
    pub working_dir: String,
    pub env: Vec<String>,
}

/// Captured result of an exec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A container carrying the managed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    /// Unix seconds
    pub created_at: i64,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create (not start) a container; returns its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput>;

    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Force-remove a container; a missing container is not an error
    async fn remove(&self, id: &str) -> Result<()>;

    /// Containers carrying `label` (`key=value`), running or not
    async fn list_managed(&self, label: &str) -> Result<Vec<ManagedContainer>>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Docker
// ============================================================================

/// Docker engine over the local daemon socket
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect and ping the daemon
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::sandbox("Failed to connect to Docker", e))?;
        docker
            .ping()
            .await
            .map_err(|e| Error::sandbox("Docker daemon not reachable", e))?;
        Ok(Self { docker })
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let binds = spec.binds();
        HostConfig {
            nano_cpus: Some(spec.limits.nano_cpus()),
            memory: Some(spec.limits.memory_bytes as i64),
            memory_swap: Some(spec.limits.memory_swap_bytes as i64),
            pids_limit: Some(spec.limits.pids_limit as i64),
            readonly_rootfs: Some(spec.security.read_only_root),
            cap_drop: Some(spec.security.drop_caps.clone()),
            security_opt: Some(spec.security.security_opts()),
            network_mode: Some(spec.network.as_str().to_string()),
            binds: if binds.is_empty() { None } else { Some(binds) },
            tmpfs: Some(spec.tmpfs()),
            auto_remove: Some(false),
            ..Default::default()
        }
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: Some(spec.user.clone()),
            env: Some(spec.env_list()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(spec.network == super::spec::NetworkMode::None),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::sandbox("Failed to create container", e))?;

        for warning in &response.warnings {
            debug!("Docker warning for {}: {}", spec.name, warning);
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::sandbox("Failed to start container", e))
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(request.command.clone()),
            user: Some(request.user.clone()),
            working_dir: Some(request.working_dir.clone()),
            env: if request.env.is_empty() {
                None
            } else {
                Some(request.env.clone())
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| Error::sandbox("Failed to create exec", e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::sandbox("Failed to start exec", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(Error::sandbox("Exec stream failed", e)),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::sandbox("Failed to inspect exec", e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::sandbox("Failed to stop container", e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::sandbox("Failed to remove container", e)),
        }
    }

    async fn list_managed(&self, label: &str) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::sandbox("Failed to list containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ManagedContainer {
                    id: c.id?,
                    created_at: c.created.unwrap_or(0),
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}
