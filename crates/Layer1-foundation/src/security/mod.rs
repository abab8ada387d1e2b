//! Security - command and path policy engine
//!
//! The only gate between caller-influenced strings and real execution.
//! - `rules`: fixed denylist / sensitive-path / environment tables
//! - `validator`: `SecurityValidator` evaluating those tables

pub mod rules;
mod validator;

pub use rules::{PathPattern, RuleCategory};
pub use validator::{is_sensitive_env_name, SecurityDecision, SecurityValidator};
