//! Task definition and types

use crate::pool::RunningProcess;
use crate::state::TaskState;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Request
// ============================================================================

/// One unit of agent work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Prompt text, fed to the agent on stdin
    pub prompt: String,

    /// Model identifier, substituted into the agent command line
    pub model: String,

    /// Opaque project identifier
    pub project_id: String,

    /// Wall-clock limit; the pool default applies when absent
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(
        prompt: impl Into<String>,
        model: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            project_id: project_id.into(),
            timeout: None,
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Result
// ============================================================================

/// Observable lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Killed,
}

impl TaskStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// Token counts reported by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Terminal outcome of a task.
///
/// `completion`, `usage` and `cost_usd` are set only for completed tasks;
/// `error` only for the other terminal statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Process wall-clock time, when a process ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TaskResult {
    pub fn completed(
        task_id: TaskId,
        completion: impl Into<String>,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            completion: Some(completion.into()),
            usage: Some(usage),
            cost_usd: Some(cost_usd),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self::unsuccessful(task_id, TaskStatus::Failed, error)
    }

    pub fn timed_out(task_id: TaskId, error: impl Into<String>) -> Self {
        Self::unsuccessful(task_id, TaskStatus::TimedOut, error)
    }

    pub fn killed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self::unsuccessful(task_id, TaskStatus::Killed, error)
    }

    fn unsuccessful(task_id: TaskId, status: TaskStatus, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status,
            completion: None,
            usage: None,
            cost_usd: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

// ============================================================================
// Task record
// ============================================================================

/// Pool-owned record of a submitted task
pub(crate) struct Task {
    pub id: TaskId,
    pub request: ExecutionRequest,
    pub timeout: Duration,
    pub state: TaskState,

    /// Scratch directory holding the prompt file; removed on delivery or drain
    pub workdir: Option<TempDir>,

    pub finished_at: Option<Instant>,
}

impl Task {
    pub fn new(request: ExecutionRequest, default_timeout: Duration) -> Self {
        let timeout = request.timeout.unwrap_or(default_timeout);
        Self {
            id: TaskId::new(),
            request,
            timeout,
            state: TaskState::Pending,
            workdir: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Move to a terminal state. Returns the evicted process, if one was
    /// running; the caller kills it after releasing the pool lock.
    pub fn finish(&mut self, result: TaskResult) -> Option<RunningProcess> {
        let previous = std::mem::replace(&mut self.state, TaskState::Finished(result));
        self.finished_at = Some(Instant::now());
        match previous {
            TaskState::Running(process) => Some(process),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_roundtrip_through_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_request_timeout_overrides_default() {
        let request =
            ExecutionRequest::new("hi", "sonnet", "p1").with_timeout(Duration::from_secs(3));
        let task = Task::new(request, Duration::from_secs(600));
        assert_eq!(task.timeout, Duration::from_secs(3));
        assert_eq!(task.status(), TaskStatus::Pending);

        let task = Task::new(ExecutionRequest::new("hi", "sonnet", "p1"), Duration::from_secs(9));
        assert_eq!(task.timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut task = Task::new(ExecutionRequest::new("hi", "m", "p"), Duration::from_secs(1));
        let evicted = task.finish(TaskResult::killed(task.id, "Killed by request"));
        assert!(evicted.is_none());
        assert_eq!(task.status(), TaskStatus::Killed);
        assert!(task.status().is_terminal());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_result_field_population() {
        let id = TaskId::new();
        let ok = TaskResult::completed(id, "done", TokenUsage::new(10, 20), 0.5);
        assert!(ok.is_success());
        assert!(ok.error.is_none());
        assert_eq!(ok.usage.unwrap().total(), 30);

        let failed = TaskResult::failed(id, "boom");
        assert!(failed.completion.is_none());
        assert!(failed.cost_usd.is_none());
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_result_serializes_snake_case_status() {
        let result = TaskResult::timed_out(TaskId::new(), "late");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "timed_out");
        assert!(json.get("completion").is_none());
    }
}
