//! Subcommand handlers

use agentd_foundation::{SecurityDecision, SecurityValidator, ServiceConfig};
use agentd_task::{
    DockerEngine, ExecutionRequest, SandboxConfig, SandboxManager, SandboxManagerConfig,
    TaskStatus, WorkerPool, WorkerPoolConfig,
};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Extra time `run` waits past the task timeout before giving up
const WAIT_MARGIN: Duration = Duration::from_secs(5);

// ============================================================================
// run
// ============================================================================

/// Submit one task, wait for it, print the result and drain the pool
pub async fn run_task(
    config: &ServiceConfig,
    prompt: String,
    model: String,
    project: String,
    timeout: Option<u64>,
    wait: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let pool_config = WorkerPoolConfig::from(&config.pool);
    let drain_grace = pool_config.drain_grace;

    let mut request = ExecutionRequest::new(prompt, model, project);
    if let Some(secs) = timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }
    let wait = match wait {
        Some(secs) => Duration::from_secs(secs),
        None => request.timeout.unwrap_or(pool_config.default_timeout) + WAIT_MARGIN,
    };

    let pool = WorkerPool::new(pool_config);
    let task_id = pool.submit(request);
    info!("Submitted task {}", task_id.short());

    let result = tokio::select! {
        result = pool.get_result(task_id, wait) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, draining");
            pool.drain(drain_grace).await;
            pool.get_result(task_id, Duration::ZERO).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);

    let report = pool.drain(drain_grace).await;
    info!(
        "Pool drained: {} completed, {} killed",
        report.completed, report.killed
    );

    Ok(if result.status == TaskStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ============================================================================
// check-command / check-path
// ============================================================================

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    subject: &'a str,
    allowed: bool,
    reason: String,
}

fn report(subject: &str, decision: SecurityDecision) -> anyhow::Result<ExitCode> {
    let allowed = decision.is_allowed();
    let report = CheckReport {
        subject,
        allowed,
        reason: decision.reason,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn check_command(config: &ServiceConfig, command: &str) -> anyhow::Result<ExitCode> {
    let validator = SecurityValidator::from_settings(&config.security);
    report(command, validator.validate_command(command))
}

pub fn check_path(config: &ServiceConfig, path: &str, write: bool) -> anyhow::Result<ExitCode> {
    let validator = SecurityValidator::from_settings(&config.security);
    report(path, validator.validate_path(path, write))
}

// ============================================================================
// exec / sweep
// ============================================================================

async fn sandbox_manager(config: &ServiceConfig) -> anyhow::Result<SandboxManager> {
    let engine = DockerEngine::connect().await?;
    Ok(SandboxManager::new(
        Arc::new(engine),
        SecurityValidator::from_settings(&config.security),
        SandboxManagerConfig::from(&config.sandbox),
    ))
}

/// Create a sandbox, run one command in it and always destroy it afterwards
pub async fn exec_once(
    config: &ServiceConfig,
    task_id: &str,
    project_path: Option<&Path>,
    command: &str,
    timeout: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let manager = sandbox_manager(config).await?;

    let limits = SandboxConfig::from(&config.sandbox);
    let sandbox = manager
        .create_sandbox(task_id, project_path, Some(limits))
        .await?;

    let outcome = manager
        .execute_command(&sandbox, command, timeout.map(Duration::from_secs))
        .await;

    if let Err(e) = manager.destroy_sandbox(sandbox, true).await {
        warn!("Failed to destroy sandbox: {}", e);
    }

    let output = outcome?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);

    Ok(match u8::try_from(output.exit_code) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    })
}

pub async fn sweep(config: &ServiceConfig, max_age: u64) -> anyhow::Result<ExitCode> {
    let manager = sandbox_manager(config).await?;
    let removed = manager
        .cleanup_old_sandboxes(Duration::from_secs(max_age))
        .await?;
    println!("Removed {} sandbox(es)", removed);
    Ok(ExitCode::SUCCESS)
}
