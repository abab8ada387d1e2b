//! Worker pool tests against real `sh` agent shims
//!
//! Each shim reads the prompt from stdin like the real agent and prints a
//! JSON result document.

#![cfg(unix)]

use agentd_task::{
    AgentCommand, ExecutionRequest, TaskId, TaskStatus, WorkerPool, WorkerPoolConfig,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const OK_DOC: &str = r#"{"result":"ok","usage":{"input_tokens":1000,"output_tokens":500},"is_error":false}"#;

fn pool_with(script: &str, max_workers: usize) -> WorkerPool {
    let config = WorkerPoolConfig::default()
        .with_max_workers(max_workers)
        .with_poll_interval(Duration::from_millis(10))
        .with_drain_grace(Duration::from_secs(1))
        .with_agent(AgentCommand::shell(script));
    WorkerPool::new(config)
}

fn request(prompt: &str) -> ExecutionRequest {
    ExecutionRequest::new(prompt, "sonnet", "project-1")
}

/// Poll `check` every 10ms until it holds or `limit` passes
async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Wait for a shim to record a helper pid in `file`
async fn helper_pid(file: &Path) -> u32 {
    let mut pid = None;
    assert!(
        eventually(Duration::from_secs(5), || {
            pid = std::fs::read_to_string(file)
                .ok()
                .and_then(|text| text.trim().parse().ok());
            pid.is_some()
        })
        .await,
        "helper pid never written to {}",
        file.display()
    );
    pid.unwrap()
}

fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_completed_task_reports_usage_and_cost() {
    let pool = pool_with(&format!("cat > /dev/null; echo '{}'", OK_DOC), 2);

    let id = pool.submit(request("say ok"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(result.status, TaskStatus::Completed, "{:?}", result.error);
    assert_eq!(result.completion.as_deref(), Some("ok"));
    let usage = result.usage.unwrap();
    assert_eq!(usage.input_tokens, 1000);
    assert_eq!(usage.output_tokens, 500);
    // sonnet: 3.0 in / 15.0 out per 1M
    let expected = 1000.0 * 3.0 / 1_000_000.0 + 500.0 * 15.0 / 1_000_000.0;
    assert!((result.cost_usd.unwrap() - expected).abs() < 1e-12);
    assert!(result.duration_ms.is_some());
}

#[tokio::test]
async fn test_prompt_is_fed_on_stdin() {
    let pool = pool_with(r#"printf '{"result":"%s"}' "$(cat)""#, 1);

    let id = pool.submit(request("hello pool"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(result.completion.as_deref(), Some("hello pool"));
}

#[tokio::test]
async fn test_model_placeholder_reaches_agent() {
    let pool = pool_with(r#"cat > /dev/null; echo '{"result":"{model}"}'"#, 1);

    let id = pool.submit(ExecutionRequest::new("x", "claude-haiku-4", "p"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(result.completion.as_deref(), Some("claude-haiku-4"));
}

#[tokio::test]
async fn test_nonzero_exit_is_failed_with_stderr() {
    let pool = pool_with("cat > /dev/null; echo 'quota exhausted' >&2; exit 3", 1);

    let id = pool.submit(request("x"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.error.unwrap().contains("quota exhausted"));
    assert!(result.cost_usd.is_none());
}

#[tokio::test]
async fn test_unparseable_output_is_failed() {
    let pool = pool_with("cat > /dev/null; echo 'not json at all'", 1);

    let id = pool.submit(request("x"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.error.unwrap().contains("parse"));
}

#[tokio::test]
async fn test_missing_agent_binary_fails_task() {
    let config = WorkerPoolConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_agent(AgentCommand::new("/nonexistent/agentd-agent", ["-p"]));
    let pool = WorkerPool::new(config);

    let id = pool.submit(request("x"));
    let result = pool.get_result(id, Duration::from_secs(5)).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(pool.stats().active_workers, 0);
}

#[tokio::test]
async fn test_scratch_directory_removed_after_delivery() {
    let pool = pool_with(r#"cat > /dev/null; printf '{"result":"%s"}' "$(pwd)""#, 1);

    let id = pool.submit(request("x"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;

    let workdir = result.completion.unwrap();
    assert!(!workdir.is_empty());
    assert!(!std::path::Path::new(&workdir).exists());
    // Record survives delivery
    assert_eq!(pool.status(id), Some(TaskStatus::Completed));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_max_workers_bounds_running_tasks() {
    let pool = pool_with("cat > /dev/null; sleep 30", 2);

    let ids: Vec<TaskId> = (0..3).map(|i| pool.submit(request(&format!("t{}", i)))).collect();

    assert!(eventually(Duration::from_secs(5), || pool.stats().running == 2).await);
    // Give the scheduler time to (wrongly) promote a third
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = pool.stats();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(pool.get_active_pids().len(), 2);
    assert_eq!(pool.status(ids[2]), Some(TaskStatus::Pending));

    // FIFO: the first two were promoted
    assert_eq!(pool.status(ids[0]), Some(TaskStatus::Running));
    assert_eq!(pool.status(ids[1]), Some(TaskStatus::Running));

    // Freeing a slot promotes the queued task
    assert!(pool.kill(ids[0]));
    assert!(eventually(Duration::from_secs(5), || {
        pool.status(ids[2]) == Some(TaskStatus::Running)
    })
    .await);
    assert_eq!(pool.get_active_pids().len(), 2);

    pool.drain(Duration::ZERO).await;
}

// ============================================================================
// Timeouts and kills
// ============================================================================

#[tokio::test]
async fn test_timeout_kills_process() {
    let pool = pool_with("cat > /dev/null; sleep 30", 1);

    let id = pool.submit(request("slow").with_timeout(Duration::from_millis(800)));

    let mut pid = None;
    assert!(eventually(Duration::from_secs(5), || {
        pid = pool.get_active_pids().get(&id).copied();
        pid.is_some()
    })
    .await);
    let pid = pid.unwrap();

    let result = pool.get_result(id, Duration::from_secs(10)).await;
    assert_eq!(result.status, TaskStatus::TimedOut);
    assert!(result.error.is_some());

    assert!(eventually(Duration::from_secs(3), || !process_alive(pid)).await);
    assert!(pool.get_active_pids().is_empty());
}

#[tokio::test]
async fn test_get_result_wait_timeout_kills_task() {
    let pool = pool_with("cat > /dev/null; sleep 30", 1);

    let id = pool.submit(request("slow"));
    assert!(eventually(Duration::from_secs(5), || !pool.get_active_pids().is_empty()).await);
    let pid = pool.get_active_pids()[&id];

    let result = pool.get_result(id, Duration::from_millis(300)).await;
    assert_eq!(result.status, TaskStatus::TimedOut);
    assert_eq!(pool.status(id), Some(TaskStatus::TimedOut));

    assert!(eventually(Duration::from_secs(3), || !process_alive(pid)).await);
    assert_eq!(pool.stats().active_workers, 0);
}

#[tokio::test]
async fn test_kill_pending_running_and_terminal() {
    let pool = pool_with("cat > /dev/null; sleep 30", 1);

    let running = pool.submit(request("a"));
    let pending = pool.submit(request("b"));
    assert!(eventually(Duration::from_secs(5), || {
        pool.status(running) == Some(TaskStatus::Running)
    })
    .await);

    assert!(pool.kill(pending));
    assert_eq!(pool.status(pending), Some(TaskStatus::Killed));
    assert!(!pool.kill(pending));

    let pid = pool.get_active_pids()[&running];
    assert!(pool.kill(running));
    let result = pool.get_result(running, Duration::from_secs(1)).await;
    assert_eq!(result.status, TaskStatus::Killed);
    assert!(eventually(Duration::from_secs(3), || !process_alive(pid)).await);

    assert!(!pool.kill(TaskId::new()));
}

#[tokio::test]
async fn test_unknown_task_result_is_failed() {
    let pool = pool_with("true", 1);
    let result = pool.get_result(TaskId::new(), Duration::from_millis(50)).await;
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("Task not found"));
}

// ============================================================================
// Drain
// ============================================================================

#[tokio::test]
async fn test_drain_counts_completed_and_killed() {
    let script = format!(
        r#"prompt="$(cat)"; if [ "$prompt" = quick ]; then sleep 0.2; echo '{}'; else sleep 30; fi"#,
        OK_DOC
    );
    let pool = pool_with(&script, 3);

    let quick = pool.submit(request("quick"));
    let slow_a = pool.submit(request("slow"));
    let slow_b = pool.submit(request("slow"));
    let queued = pool.submit(request("quick"));

    assert!(eventually(Duration::from_secs(5), || pool.stats().running == 3).await);
    let pids: Vec<u32> = pool.get_active_pids().values().copied().collect();

    let report = pool.drain(Duration::from_secs(2)).await;
    assert_eq!(report.completed, 1);
    assert_eq!(report.killed, 2);
    assert_eq!(<(usize, usize)>::from(report), (1, 2));

    assert_eq!(pool.status(quick), Some(TaskStatus::Completed));
    assert_eq!(pool.status(slow_a), Some(TaskStatus::Killed));
    assert_eq!(pool.status(slow_b), Some(TaskStatus::Killed));
    assert_eq!(pool.status(queued), Some(TaskStatus::Killed));

    assert!(pool.get_active_pids().is_empty());
    for pid in pids {
        assert!(eventually(Duration::from_secs(3), || !process_alive(pid)).await);
    }

    // Submissions after drain never start
    let late = pool.submit(request("quick"));
    assert_eq!(pool.status(late), Some(TaskStatus::Killed));
}

#[tokio::test]
async fn test_drain_kills_helpers_that_ignore_sigterm() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!(
        "cat > /dev/null; (trap '' TERM; exec sleep 60) > /dev/null 2>&1 & echo $! > {}; wait",
        pid_file.display()
    );
    let pool = pool_with(&script, 1);

    let id = pool.submit(request("x"));
    let helper = helper_pid(&pid_file).await;
    assert!(process_alive(helper));

    let report = pool.drain(Duration::from_millis(100)).await;
    assert_eq!(report.killed, 1);
    assert_eq!(pool.status(id), Some(TaskStatus::Killed));
    assert!(eventually(Duration::from_secs(3), || !process_alive(helper)).await);
}

#[tokio::test]
async fn test_helpers_do_not_outlive_finished_agent() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!(
        "cat > /dev/null; sleep 60 > /dev/null 2>&1 & echo $! > {}; echo '{}'",
        pid_file.display(),
        OK_DOC
    );
    let pool = pool_with(&script, 1);

    let id = pool.submit(request("x"));
    let result = pool.get_result(id, Duration::from_secs(10)).await;
    assert_eq!(result.status, TaskStatus::Completed, "{:?}", result.error);

    let helper = helper_pid(&pid_file).await;
    assert!(eventually(Duration::from_secs(3), || !process_alive(helper)).await);

    let report = pool.drain(Duration::ZERO).await;
    assert_eq!((report.completed, report.killed), (0, 0));
}

#[tokio::test]
async fn test_held_open_stdout_does_not_stall_pool() {
    // Leaves a helper holding stdout after printing a valid result
    let script = format!(
        r#"prompt="$(cat)"; if [ "$prompt" = leaky ]; then echo '{}'; sleep 30 & exit 0; else sleep 30; fi"#,
        OK_DOC
    );
    let pool = pool_with(&script, 2);

    let leaky = pool.submit(request("leaky"));
    let started = Instant::now();
    let slow = pool.submit(request("slow").with_timeout(Duration::from_millis(300)));

    let slow_result = pool.get_result(slow, Duration::from_secs(10)).await;
    assert_eq!(slow_result.status, TaskStatus::TimedOut);
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "timeout enforced only after {:?}",
        started.elapsed()
    );

    let leaky_result = pool.get_result(leaky, Duration::from_secs(10)).await;
    assert_eq!(leaky_result.status, TaskStatus::Completed, "{:?}", leaky_result.error);
    assert_eq!(leaky_result.completion.as_deref(), Some("ok"));
}

#[tokio::test]
async fn test_drain_idle_pool() {
    let pool = pool_with("true", 2);
    let report = pool.drain(Duration::from_millis(100)).await;
    assert_eq!(report.completed, 0);
    assert_eq!(report.killed, 0);
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_cleanup_finished_forgets_records() {
    let pool = pool_with(&format!("cat > /dev/null; echo '{}'", OK_DOC), 1);

    let id = pool.submit(request("x"));
    pool.get_result(id, Duration::from_secs(10)).await;

    assert_eq!(pool.cleanup_finished(Duration::from_secs(3600)), 0);
    assert_eq!(pool.cleanup_finished(Duration::ZERO), 1);
    assert_eq!(pool.status(id), None);
    assert_eq!(pool.stats().total, 0);
}
