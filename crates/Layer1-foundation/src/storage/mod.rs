//! Storage module for agentd
//!
//! - `json`: JSON documents on disk (configuration files)

mod json;

pub use json::JsonStore;
