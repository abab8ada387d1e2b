//! Graceful shutdown
//!
//! Wait for running tasks, then SIGTERM the stragglers' process groups,
//! then SIGKILL every straggler group after the grace period whether or not
//! its leader is still around.

use super::process::{kill_group, terminate_group};
use super::{drop_workdir, PoolInner, WorkerPool};
use crate::task::{TaskId, TaskResult};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a drain, over the tasks that had a process when it began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Finished on their own before the deadline
    pub completed: usize,
    /// Signalled after the deadline
    pub killed: usize,
}

impl From<DrainReport> for (usize, usize) {
    fn from(report: DrainReport) -> Self {
        (report.completed, report.killed)
    }
}

impl WorkerPool {
    /// Stop promotions and wind down every task.
    ///
    /// On return no agent process started by this pool is left running,
    /// pending tasks are recorded as killed and all scratch directories are
    /// removed.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let inner = &self.inner;

        let tracked: Vec<TaskId> = {
            let mut state = inner.state.lock();
            state.draining = true;
            state
                .tasks
                .iter()
                .filter(|(_, task)| task.state.is_running())
                .map(|(id, _)| *id)
                .collect()
        };
        info!(
            "Draining worker pool: {} running task(s), timeout {:.1}s",
            tracked.len(),
            timeout.as_secs_f64()
        );

        wait_while_running(inner, &tracked, timeout).await;

        // Stragglers get SIGTERM and the grace period
        let stragglers: Vec<(TaskId, u32)> = {
            let state = inner.state.lock();
            tracked
                .iter()
                .filter_map(|id| {
                    state
                        .tasks
                        .get(id)
                        .and_then(|task| task.state.pid())
                        .map(|pid| (*id, pid))
                })
                .collect()
        };

        if !stragglers.is_empty() {
            warn!(
                "{} task(s) still running after {:.1}s, sending SIGTERM",
                stragglers.len(),
                timeout.as_secs_f64()
            );
            let ids: Vec<TaskId> = stragglers.iter().map(|(id, _)| *id).collect();
            inner.state.lock().terminated.extend(ids.iter().copied());
            for (_, pid) in &stragglers {
                terminate_group(*pid);
            }
            wait_while_running(inner, &ids, inner.config.drain_grace).await;

            let evicted: Vec<_> = {
                let mut state = inner.state.lock();
                ids.iter()
                    .filter_map(|id| {
                        PoolInner::finish_active(
                            &mut state,
                            *id,
                            TaskResult::killed(*id, "Killed during drain"),
                        )
                        .flatten()
                    })
                    .collect()
            };
            for process in evicted {
                debug!("SIGKILL pid {} after grace period", process.pid());
                process.kill();
            }
            // Leaders that died on SIGTERM may have left helpers behind
            for (_, pid) in &stragglers {
                kill_group(*pid);
            }
        }

        // Stop the scheduler before touching the remaining records
        inner.shutdown.store(true, Ordering::Release);
        let scheduler = self.scheduler.lock().take();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Scheduler ended abnormally: {}", e);
                }
            }
        }

        let (leftovers, workdirs) = {
            let mut state = inner.state.lock();
            let ids: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, task)| !task.state.is_terminal())
                .map(|(id, _)| *id)
                .collect();
            let leftovers: Vec<_> = ids
                .iter()
                .filter_map(|id| {
                    PoolInner::finish_active(
                        &mut state,
                        *id,
                        TaskResult::killed(*id, "Worker pool drained"),
                    )
                    .flatten()
                })
                .collect();
            state.queue.clear();
            state.active = 0;
            let workdirs: Vec<_> = state
                .tasks
                .values_mut()
                .filter_map(|task| task.workdir.take())
                .collect();
            (leftovers, workdirs)
        };

        // Only reachable if a process outlived the scheduler's last reap
        for process in leftovers {
            process.kill();
        }
        for dir in workdirs {
            drop_workdir(Some(dir));
        }

        let report = DrainReport {
            completed: tracked.len() - stragglers.len(),
            killed: stragglers.len(),
        };
        info!(
            "Worker pool drained: {} completed, {} killed",
            report.completed, report.killed
        );
        report
    }
}

async fn wait_while_running(inner: &PoolInner, ids: &[TaskId], limit: Duration) {
    let deadline = Instant::now() + limit;
    while inner.any_running(ids) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(inner.config.poll_interval.min(deadline - now)).await;
    }
}
