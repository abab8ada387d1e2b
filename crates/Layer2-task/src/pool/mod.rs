//! Worker Pool - bounded concurrent execution of agent processes
//!
//! Tasks are queued FIFO and promoted by a background scheduler while fewer
//! than `max_workers` processes run. All task state sits behind one lock
//! that is never held across an await or process I/O: spawns, kills and
//! output collection happen after the lock is released, and the state is
//! re-checked when the lock is taken again.

mod config;
mod drain;
mod process;
mod scheduler;

pub use config::{AgentCommand, WorkerPoolConfig, MODEL_PLACEHOLDER};
pub use drain::DrainReport;
pub use process::{PROJECT_ID_ENV, PROMPT_FILE};
pub(crate) use process::RunningProcess;

use crate::cost::PricingTable;
use crate::task::{ExecutionRequest, Task, TaskId, TaskResult, TaskStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ============================================================================
// Shared state
// ============================================================================

pub(crate) struct PoolState {
    pub tasks: HashMap<TaskId, Task>,
    pub queue: VecDeque<TaskId>,
    /// Tasks counted against `max_workers`: running, or popped and launching
    pub active: usize,
    pub draining: bool,
    /// Sent SIGTERM by drain; their exits are recorded as killed
    pub terminated: HashSet<TaskId>,
    /// Exited, output still being collected off the scheduler loop
    pub collecting: HashSet<TaskId>,
}

pub(crate) struct PoolInner {
    pub config: WorkerPoolConfig,
    pub pricing: PricingTable,
    pub state: Mutex<PoolState>,
    pub shutdown: AtomicBool,
}

impl PoolInner {
    /// Finish a non-terminal task. Returns `None` when the task is unknown
    /// or already terminal, otherwise the evicted process (if it had one).
    fn finish_active(
        state: &mut PoolState,
        task_id: TaskId,
        result: TaskResult,
    ) -> Option<Option<RunningProcess>> {
        let task = state.tasks.get_mut(&task_id)?;
        if task.state.is_terminal() {
            return None;
        }
        if task.state.is_pending() {
            state.queue.retain(|id| *id != task_id);
        }
        let evicted = task.finish(result);
        if evicted.is_some() {
            state.active = state.active.saturating_sub(1);
        }
        Some(evicted)
    }

    fn any_running(&self, ids: &[TaskId]) -> bool {
        let state = self.state.lock();
        ids.iter().any(|id| {
            state
                .tasks
                .get(id)
                .is_some_and(|task| task.state.is_running())
        })
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub killed: usize,
    /// Slots in use, including tasks still launching
    pub active_workers: usize,
}

/// Bounded pool of external agent processes
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and start its scheduler. Must be called inside a
    /// tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self::with_pricing(config, PricingTable::standard())
    }

    pub fn with_pricing(config: WorkerPoolConfig, pricing: PricingTable) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            pricing,
            state: Mutex::new(PoolState {
                tasks: HashMap::new(),
                queue: VecDeque::new(),
                active: 0,
                draining: false,
                terminated: HashSet::new(),
                collecting: HashSet::new(),
            }),
            shutdown: AtomicBool::new(false),
        });

        let scheduler = tokio::spawn(scheduler::run(Arc::clone(&inner)));

        info!(
            "Worker pool started (max_workers: {}, agent: {})",
            inner.config.max_workers, inner.config.agent.program
        );

        Self {
            inner,
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Queue a request. Always succeeds; once draining has begun the task
    /// is recorded as killed straight away.
    pub fn submit(&self, request: ExecutionRequest) -> TaskId {
        let mut task = Task::new(request, self.inner.config.default_timeout);
        let task_id = task.id;

        let mut state = self.inner.state.lock();
        if state.draining {
            task.finish(TaskResult::killed(task_id, "Worker pool is draining"));
            warn!("Task {} submitted during drain, not started", task_id.short());
        } else {
            state.queue.push_back(task_id);
            debug!(
                "Queued task {} (model: {}, project: {})",
                task_id.short(),
                task.request.model,
                task.request.project_id
            );
        }
        state.tasks.insert(task_id, task);

        task_id
    }

    /// Wait up to `wait_timeout` for a terminal result.
    ///
    /// A task still not finished when the wait expires is killed and
    /// reported as timed out. Unknown ids yield a failed result.
    pub async fn get_result(&self, task_id: TaskId, wait_timeout: Duration) -> TaskResult {
        let deadline = Instant::now() + wait_timeout;

        loop {
            if let Some(result) = self.take_result(task_id) {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let nap = self.inner.config.poll_interval.min(deadline - now);
            tokio::time::sleep(nap).await;
        }

        let timeout_result = TaskResult::timed_out(
            task_id,
            format!("No result within {:.1}s", wait_timeout.as_secs_f64()),
        );
        let outcome = {
            let mut state = self.inner.state.lock();
            PoolInner::finish_active(&mut state, task_id, timeout_result)
        };

        match outcome {
            Some(evicted) => {
                let mut result = self
                    .take_result(task_id)
                    .unwrap_or_else(|| TaskResult::failed(task_id, "Task not found"));
                if let Some(process) = evicted {
                    result = result.with_duration(process.elapsed());
                    process.kill();
                }
                warn!("Task {} timed out waiting for result", task_id.short());
                result
            }
            // Finished between the last poll and the lock
            None => self
                .take_result(task_id)
                .unwrap_or_else(|| TaskResult::failed(task_id, "Task not found")),
        }
    }

    /// Terminal result if available. The scratch directory goes with the
    /// first delivery; the record stays for status queries.
    fn take_result(&self, task_id: TaskId) -> Option<TaskResult> {
        let (result, workdir) = {
            let mut state = self.inner.state.lock();
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return Some(TaskResult::failed(task_id, "Task not found"));
            };
            let result = task.state.result()?.clone();
            (result, task.workdir.take())
        };
        drop_workdir(workdir);
        Some(result)
    }

    /// Kill a pending or running task. Returns false for unknown or
    /// already-terminal tasks.
    pub fn kill(&self, task_id: TaskId) -> bool {
        let outcome = {
            let mut state = self.inner.state.lock();
            PoolInner::finish_active(
                &mut state,
                task_id,
                TaskResult::killed(task_id, "Killed by request"),
            )
        };

        match outcome {
            Some(evicted) => {
                if let Some(process) = evicted {
                    info!("Killing task {} (pid {})", task_id.short(), process.pid());
                    process.kill();
                } else {
                    info!("Cancelled pending task {}", task_id.short());
                }
                true
            }
            None => false,
        }
    }

    /// PIDs of tasks currently running
    pub fn get_active_pids(&self) -> HashMap<TaskId, u32> {
        let state = self.inner.state.lock();
        state
            .tasks
            .iter()
            .filter_map(|(id, task)| task.state.pid().map(|pid| (*id, pid)))
            .collect()
    }

    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        let state = self.inner.state.lock();
        state.tasks.get(&task_id).map(|task| task.status())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let mut stats = PoolStats {
            total: state.tasks.len(),
            active_workers: state.active,
            ..Default::default()
        };
        for task in state.tasks.values() {
            match task.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::TimedOut => stats.timed_out += 1,
                TaskStatus::Killed => stats.killed += 1,
            }
        }
        stats
    }

    /// Forget terminal tasks finished more than `older_than` ago
    pub fn cleanup_finished(&self, older_than: Duration) -> usize {
        let removed: Vec<Task> = {
            let mut state = self.inner.state.lock();
            let expired: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, task)| {
                    task.finished_at
                        .is_some_and(|at| at.elapsed() >= older_than)
                })
                .map(|(id, _)| *id)
                .collect();
            expired
                .iter()
                .filter_map(|id| state.tasks.remove(id))
                .collect()
        };

        let count = removed.len();
        for task in removed {
            drop_workdir(task.workdir);
        }
        if count > 0 {
            debug!("Removed {} finished task record(s)", count);
        }
        count
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
    }
}

fn drop_workdir(workdir: Option<TempDir>) {
    if let Some(dir) = workdir {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!("Failed to remove task directory {}: {}", path.display(), e);
        }
    }
}
