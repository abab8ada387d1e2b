//! Sandbox Manager - isolated, resource-bounded command execution
//!
//! Every sandbox is one container plus one host workspace directory bound
//! at `/workspace`. All commands pass the security validator before the
//! engine sees them. The engine's labels are the only registry: nothing
//! about live sandboxes is kept in-process.

use super::config::{SandboxConfig, SandboxManagerConfig};
use super::engine::{ContainerEngine, ExecOutput, ExecRequest};
use super::spec::{
    ContainerSpec, VolumeMount, LABEL_CREATED_AT, LABEL_MANAGED, LABEL_TASK_ID, LABEL_WORKSPACE,
    PROJECT_MOUNT, WORKSPACE_MOUNT,
};
use super::workspace;
use agentd_foundation::{Error, Result, SecurityValidator};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra host-side allowance over the in-container `timeout`
const EXEC_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

/// Grace given to the keepalive process on stop
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on task id length (container names are limited)
const MAX_TASK_ID_LEN: usize = 64;

/// Kind of file access being pre-checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
}

/// A live sandbox. Consumed by `destroy_sandbox`.
#[derive(Debug, Serialize)]
pub struct Sandbox {
    pub task_id: String,
    /// Engine-assigned container id
    pub container_id: String,
    /// `agentd-<task_id>-<uuid8>`; also the workspace directory name
    pub name: String,
    pub workspace: PathBuf,
    pub project_path: Option<PathBuf>,
    pub config: SandboxConfig,
    pub created_at: DateTime<Utc>,
}

pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    validator: SecurityValidator,
    config: SandboxManagerConfig,
}

impl SandboxManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        validator: SecurityValidator,
        config: SandboxManagerConfig,
    ) -> Self {
        Self {
            engine,
            validator,
            config,
        }
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    pub fn config(&self) -> &SandboxManagerConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocate a workspace and start a locked-down container for `task_id`.
    ///
    /// Anything created before a failure is torn down before the error is
    /// returned.
    pub async fn create_sandbox(
        &self,
        task_id: &str,
        project_path: Option<&Path>,
        config: Option<SandboxConfig>,
    ) -> Result<Sandbox> {
        validate_task_id(task_id)?;
        let project_path = project_path.map(resolve_project).transpose()?;
        let config = config.unwrap_or_else(|| self.config.defaults.clone());

        let name = format!("agentd-{}-{}", task_id, &Uuid::new_v4().simple().to_string()[..8]);
        let workspace =
            workspace::allocate(&self.config.workspace_base, &name, Some(&self.config.user))?;
        let created_at = Utc::now();

        let mut spec = ContainerSpec::new(&name, &self.config.image, config.clone())
            .with_user(&self.config.user)
            .with_env(self.validator.sanitize_environment(self.config.env.clone()))
            .with_volume(VolumeMount::new(&workspace, WORKSPACE_MOUNT))
            .with_label(LABEL_MANAGED, "true")
            .with_label(LABEL_TASK_ID, task_id)
            .with_label(LABEL_WORKSPACE, workspace.display().to_string())
            .with_label(LABEL_CREATED_AT, created_at.timestamp().to_string());
        if let Some(project) = &project_path {
            spec = spec.with_volume(VolumeMount::new(project, PROJECT_MOUNT).read_only());
        }

        let container_id = match self.engine.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                workspace::remove_quietly(&workspace);
                return Err(e);
            }
        };

        if let Err(e) = self.engine.start(&container_id).await {
            if let Err(remove_err) = self.engine.remove(&container_id).await {
                warn!(
                    "Failed to remove container {} after start failure: {}",
                    container_id, remove_err
                );
            }
            workspace::remove_quietly(&workspace);
            return Err(e);
        }

        info!(
            "Created sandbox {} for task {} ({}, network: {})",
            name,
            task_id,
            self.engine.name(),
            if config.network_enabled { "on" } else { "off" }
        );

        Ok(Sandbox {
            task_id: task_id.to_string(),
            container_id,
            name,
            workspace,
            project_path,
            config,
            created_at,
        })
    }

    /// Stop and remove the container, then delete the workspace.
    ///
    /// With `force` every step is best-effort. Without it a container
    /// removal failure is returned (after the workspace is still removed).
    pub async fn destroy_sandbox(&self, sandbox: Sandbox, force: bool) -> Result<()> {
        if let Err(e) = self.engine.stop(&sandbox.container_id, STOP_GRACE).await {
            debug!("Stop of {} failed, removing anyway: {}", sandbox.name, e);
        }

        let removed = self.engine.remove(&sandbox.container_id).await;
        if let Err(e) = &removed {
            warn!("Failed to remove container for {}: {}", sandbox.name, e);
        }

        workspace::remove_quietly(&sandbox.workspace);

        match removed {
            Err(e) if !force => Err(e),
            _ => {
                info!("Destroyed sandbox {}", sandbox.name);
                Ok(())
            }
        }
    }

    /// Destroy managed containers older than `max_age`; returns how many
    /// were removed.
    pub async fn cleanup_old_sandboxes(&self, max_age: Duration) -> Result<usize> {
        let selector = format!("{}=true", LABEL_MANAGED);
        let containers = self.engine.list_managed(&selector).await?;
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        let mut removed = 0;
        for container in containers {
            let created = container
                .labels
                .get(LABEL_CREATED_AT)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(container.created_at);
            let Some(created) = Utc.timestamp_opt(created, 0).single() else {
                continue;
            };
            if now.signed_duration_since(created) <= max_age {
                continue;
            }

            if let Err(e) = self.engine.stop(&container.id, STOP_GRACE).await {
                debug!("Stop of stale container {} failed: {}", container.id, e);
            }
            if let Err(e) = self.engine.remove(&container.id).await {
                warn!("Failed to remove stale container {}: {}", container.id, e);
                continue;
            }

            if let Some(path) = container.labels.get(LABEL_WORKSPACE) {
                let path = Path::new(path);
                if self.owns_workspace(path) {
                    workspace::remove_quietly(path);
                } else {
                    warn!(
                        "Not removing workspace {} outside {}",
                        path.display(),
                        self.config.workspace_base.display()
                    );
                }
            }

            debug!(
                "Reaped stale sandbox {} (task {})",
                container.id,
                container
                    .labels
                    .get(LABEL_TASK_ID)
                    .map(String::as_str)
                    .unwrap_or("?")
            );
            removed += 1;
        }

        if removed > 0 {
            info!("Cleaned up {} stale sandbox(es)", removed);
        }
        Ok(removed)
    }

    fn owns_workspace(&self, path: &Path) -> bool {
        path.parent() == Some(self.config.workspace_base.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("agentd-"))
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run one shell command inside the sandbox.
    ///
    /// Denied commands fail with `Error::SecurityViolation` and never reach
    /// the engine.
    pub async fn execute_command(
        &self,
        sandbox: &Sandbox,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        self.validator.validate_command(command).into_result()?;

        let timeout = timeout.unwrap_or(sandbox.config.timeout);
        let secs = timeout.as_secs().max(1);
        let request = ExecRequest {
            command: vec![
                "timeout".to_string(),
                "-s".to_string(),
                "KILL".to_string(),
                secs.to_string(),
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            user: self.config.user.clone(),
            working_dir: WORKSPACE_MOUNT.to_string(),
            env: Vec::new(),
        };

        debug!("Exec in {}: {}", sandbox.name, command);

        let bound = Duration::from_secs(secs) + EXEC_TIMEOUT_MARGIN;
        match tokio::time::timeout(bound, self.engine.exec(&sandbox.container_id, &request)).await
        {
            Ok(output) => output,
            Err(_) => {
                warn!("Command in {} exceeded {}s", sandbox.name, secs);
                Err(Error::Timeout(format!(
                    "Command exceeded {}s in sandbox {}",
                    secs, sandbox.name
                )))
            }
        }
    }

    /// Pre-check a path against the policy without executing anything
    pub fn validate_file_access(&self, path: &str, operation: FileOperation) -> bool {
        self.validator
            .validate_path(path, operation == FileOperation::Write)
            .is_allowed()
    }

    // ========================================================================
    // Workspace introspection
    // ========================================================================

    pub fn get_workspace_files(&self, sandbox: &Sandbox) -> Result<Vec<PathBuf>> {
        workspace::list_files(&sandbox.workspace)
    }

    pub fn get_workspace_size(&self, sandbox: &Sandbox) -> Result<u64> {
        workspace::size_bytes(&sandbox.workspace)
    }

    pub fn workspace_over_quota(&self, sandbox: &Sandbox) -> Result<bool> {
        Ok(self.get_workspace_size(sandbox)? > sandbox.config.workspace_size_bytes)
    }
}

fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty() || task_id.len() > MAX_TASK_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "Task id must be 1-{} characters",
            MAX_TASK_ID_LEN
        )));
    }
    if !task_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "Task id '{}' may only contain letters, digits, '-' and '_'",
            task_id
        )));
    }
    Ok(())
}

fn resolve_project(path: &Path) -> Result<PathBuf> {
    let resolved = path.canonicalize().map_err(|e| {
        Error::InvalidInput(format!("Project path {}: {}", path.display(), e))
    })?;
    if !resolved.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Project path {} is not a directory",
            path.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_validation() {
        assert!(validate_task_id("task-42_a").is_ok());
        assert!(matches!(validate_task_id(""), Err(Error::InvalidInput(_))));
        assert!(matches!(validate_task_id("a/b"), Err(Error::InvalidInput(_))));
        assert!(validate_task_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_missing_project_is_invalid_input() {
        let err = resolve_project(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
