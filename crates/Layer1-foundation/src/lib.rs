//! # agentd-foundation
//!
//! Foundation layer for agentd:
//! - Error: the shared `Error` / `Result` types
//! - Config: `ServiceConfig` (pool, sandbox and security sections)
//! - Storage: `JsonStore` for configuration documents
//! - Security: `SecurityValidator`, the fail-closed command/path policy
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  agentd-cli                                          │
//! │        │                                             │
//! │        ▼                                             │
//! │  agentd-task                                         │
//! │  ├── WorkerPool  ──► agent CLI processes             │
//! │  └── SandboxManager ──► container engine             │
//! │             │                                        │
//! │             ▼                                        │
//! │  agentd-foundation::SecurityValidator                │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod security;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    AgentCommandSettings, PoolSettings, SandboxSettings, SecuritySettings, ServiceConfig,
    SERVICE_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;

// ============================================================================
// Security
// ============================================================================
pub use security::{SecurityDecision, SecurityValidator};
