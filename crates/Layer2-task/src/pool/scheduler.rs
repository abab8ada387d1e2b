//! Scheduler loop
//!
//! Each tick promotes at most one pending task, then reaps exited processes
//! and expires running tasks past their timeout. Output of an exited task is
//! collected on its own tokio task so a held-open pipe never stalls the loop.

use super::process::{kill_group, OutputReaders, RunningProcess};
use super::{PoolInner, PoolState};
use crate::output::interpret_exit;
use crate::state::TaskState;
use crate::task::{TaskId, TaskResult};
use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for output pipes after exit
const OUTPUT_COLLECT_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) async fn run(inner: Arc<PoolInner>) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.promote_next();
        inner.reap();
    }

    debug!("Scheduler stopped");
}

/// An exited process awaiting output collection
struct Exited {
    task_id: TaskId,
    pid: u32,
    status: ExitStatus,
    output: OutputReaders,
    elapsed: Duration,
    model: String,
}

impl PoolInner {
    /// Launch the head of the queue if a worker slot is free
    pub(crate) fn promote_next(&self) {
        let (task_id, request) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.draining || state.active >= self.config.max_workers {
                return;
            }
            let Some(task_id) = state.queue.pop_front() else {
                return;
            };
            let Some(task) = state.tasks.get(&task_id) else {
                return;
            };
            if !task.state.is_pending() {
                return;
            }
            state.active += 1;
            (task_id, task.request.clone())
        };

        let launched = tempfile::Builder::new()
            .prefix("agentd-task-")
            .tempdir()
            .map_err(agentd_foundation::Error::from)
            .and_then(|dir| {
                RunningProcess::spawn(&self.config.agent, &request, dir.path())
                    .map(|process| (dir, process))
            });

        let mut stray = None;
        let mut stray_dir = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let draining = state.draining;
            match state.tasks.get_mut(&task_id) {
                Some(task) if task.state.is_pending() => match launched {
                    Ok((dir, process)) if !draining => {
                        info!(
                            "Started task {} (pid {}, model {})",
                            task_id.short(),
                            process.pid(),
                            request.model
                        );
                        task.workdir = Some(dir);
                        task.state = TaskState::Running(process);
                    }
                    Ok((dir, process)) => {
                        task.workdir = Some(dir);
                        task.finish(TaskResult::killed(task_id, "Worker pool is draining"));
                        state.active -= 1;
                        stray = Some(process);
                    }
                    Err(e) => {
                        error!("Failed to start task {}: {}", task_id.short(), e);
                        task.finish(TaskResult::failed(task_id, e.to_string()));
                        state.active -= 1;
                    }
                },
                // Killed or timed out while launching
                _ => {
                    state.active = state.active.saturating_sub(1);
                    if let Ok((dir, process)) = launched {
                        stray = Some(process);
                        stray_dir = Some(dir);
                    }
                }
            }
        }

        if let Some(process) = stray {
            debug!("Discarding process {} for task {}", process.pid(), task_id.short());
            process.kill();
        }
        drop(stray_dir);
    }

    /// Record exits and expire overdue tasks
    pub(crate) fn reap(self: &Arc<Self>) {
        let mut exited = Vec::new();
        let mut evicted = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut expired = Vec::new();
            let mut broken = Vec::new();

            for (id, task) in state.tasks.iter_mut() {
                if state.collecting.contains(id) {
                    continue;
                }
                let TaskState::Running(process) = &mut task.state else {
                    continue;
                };
                match process.try_exit() {
                    Ok(Some(status)) => exited.push(Exited {
                        task_id: *id,
                        pid: process.pid(),
                        status,
                        output: process.take_output(),
                        elapsed: process.elapsed(),
                        model: task.request.model.clone(),
                    }),
                    Ok(None) if process.elapsed() >= task.timeout => {
                        expired.push((*id, task.timeout));
                    }
                    Ok(None) => {}
                    Err(e) => broken.push((*id, e.to_string())),
                }
            }
            state
                .collecting
                .extend(exited.iter().map(|done| done.task_id));

            for (id, timeout) in expired {
                let result = TaskResult::timed_out(
                    id,
                    format!("Exceeded timeout of {:.1}s", timeout.as_secs_f64()),
                );
                if let Some(process) = evict(state, id, result) {
                    warn!("Task {} timed out (pid {})", id.short(), process.pid());
                    evicted.push(process);
                }
            }
            for (id, reason) in broken {
                let result = TaskResult::failed(id, format!("Failed to poll process: {}", reason));
                if let Some(process) = evict(state, id, result) {
                    error!("Lost track of task {} (pid {})", id.short(), process.pid());
                    evicted.push(process);
                }
            }
        }

        for process in evicted {
            process.kill();
        }

        for done in exited {
            // The leader is gone; take down anything it left in its group so
            // the pipes close and nothing outlives the task
            kill_group(done.pid);
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.record_exit(done).await });
        }
    }

    async fn record_exit(&self, done: Exited) {
        let (stdout, stderr) = done.output.collect(OUTPUT_COLLECT_TIMEOUT).await;
        let result = interpret_exit(
            done.task_id,
            done.status,
            &stdout,
            &stderr,
            &done.model,
            &self.pricing,
        )
        .with_duration(done.elapsed);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.collecting.remove(&done.task_id);
        let Some(task) = state.tasks.get_mut(&done.task_id) else {
            return;
        };
        // A kill, timeout or drain may have won while output was collected
        if !task.state.is_running() {
            return;
        }
        let result = if state.terminated.contains(&done.task_id) {
            TaskResult::killed(done.task_id, "Terminated during drain").with_duration(done.elapsed)
        } else {
            result
        };
        info!(
            "Task {} finished: {} ({} ms)",
            done.task_id.short(),
            result.status,
            done.elapsed.as_millis()
        );
        task.finish(result);
        state.active = state.active.saturating_sub(1);
    }
}

/// Finish a running task with the given result and hand back its process
fn evict(state: &mut PoolState, task_id: TaskId, result: TaskResult) -> Option<RunningProcess> {
    let task = state.tasks.get_mut(&task_id)?;
    let elapsed = match &task.state {
        TaskState::Running(process) => process.elapsed(),
        _ => return None,
    };
    let process = task.finish(result.with_duration(elapsed));
    state.active = state.active.saturating_sub(1);
    process
}
