//! # agentd-task
//!
//! Execution core for agentd.
//!
//! ## Features
//!
//! - Bounded worker pool for external agent processes
//! - FIFO queueing, per-task timeouts and graceful drain
//! - Token usage and cost accounting per task
//! - Container sandboxes with resource quotas and a policy-gated exec

pub mod cost;
pub mod output;
pub mod pool;
pub mod sandbox;
pub mod task;

mod state;

// Worker pool
pub use pool::{AgentCommand, DrainReport, PoolStats, WorkerPool, WorkerPoolConfig};
pub use task::{ExecutionRequest, TaskId, TaskResult, TaskStatus, TokenUsage};

// Cost
pub use cost::{ModelPricing, PricingTable};

// Sandbox
pub use sandbox::{
    ContainerEngine, ContainerSpec, DockerEngine, ExecOutput, ExecRequest, FileOperation,
    ManagedContainer, Sandbox, SandboxConfig, SandboxManager, SandboxManagerConfig,
};
