//! Task state machine
//!
//! `Pending -> Running -> Finished`, or `Pending -> Finished` for tasks
//! killed or failed before their process started. `Finished` is absorbing.

use crate::pool::RunningProcess;
use crate::task::{TaskResult, TaskStatus};

/// Possible states of a task
pub(crate) enum TaskState {
    /// Queued, no process yet
    Pending,

    /// Agent process alive (or exited but not yet reaped)
    Running(RunningProcess),

    /// Terminal
    Finished(TaskResult),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Running(_) => TaskStatus::Running,
            TaskState::Finished(result) => result.status,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running(_))
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            TaskState::Running(process) => Some(process.pid()),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            TaskState::Finished(result) => Some(result),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Running(process) => write!(f, "Running(pid {})", process.pid()),
            TaskState::Finished(result) => write!(f, "Finished({})", result.status),
        }
    }
}
