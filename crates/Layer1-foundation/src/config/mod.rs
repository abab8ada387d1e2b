//! Config - service settings
//!
//! - `service.rs` - ServiceConfig and its per-component sections

mod service;

pub use service::{
    AgentCommandSettings, PoolSettings, SandboxSettings, SecuritySettings, ServiceConfig,
    SERVICE_CONFIG_FILE,
};
