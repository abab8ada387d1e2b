//! Agent output interpretation
//!
//! The agent prints one JSON document on stdout:
//! `{"result": "...", "usage": {"input_tokens": N, "output_tokens": M}, "is_error": false}`.
//! Some agents emit progress lines first, so when the whole stream is not a
//! document the last non-empty line is tried.

use crate::cost::PricingTable;
use crate::task::{TaskId, TaskResult, TokenUsage};
use serde::Deserialize;
use std::process::ExitStatus;

/// Longest stderr excerpt carried into an error message
const STDERR_EXCERPT_CHARS: usize = 2_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentOutput {
    #[serde(default)]
    pub result: Option<String>,

    #[serde(default)]
    pub usage: Option<AgentUsage>,

    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AgentUsage {
    #[serde(default)]
    pub input_tokens: u64,

    #[serde(default)]
    pub output_tokens: u64,
}

impl From<AgentUsage> for TokenUsage {
    fn from(usage: AgentUsage) -> Self {
        TokenUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

pub fn parse_agent_output(stdout: &str) -> Result<AgentOutput, serde_json::Error> {
    let trimmed = stdout.trim();
    match serde_json::from_str::<AgentOutput>(trimmed) {
        Ok(output) => Ok(output),
        Err(e) => trimmed
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str(line).ok())
            .ok_or(e),
    }
}

/// Build the terminal result for an agent process that exited on its own
pub fn interpret_exit(
    task_id: TaskId,
    status: ExitStatus,
    stdout: &str,
    stderr: &str,
    model: &str,
    pricing: &PricingTable,
) -> TaskResult {
    if !status.success() {
        let detail = excerpt(stderr);
        let detail = if detail.is_empty() {
            "no error output"
        } else {
            detail
        };
        return TaskResult::failed(task_id, format!("Agent exited with {}: {}", status, detail));
    }

    match parse_agent_output(stdout) {
        Ok(output) if output.is_error => TaskResult::failed(
            task_id,
            output
                .result
                .unwrap_or_else(|| "Agent reported an error".to_string()),
        ),
        Ok(output) => {
            let usage: TokenUsage = output.usage.unwrap_or_default().into();
            let cost = pricing.cost(model, &usage);
            TaskResult::completed(task_id, output.result.unwrap_or_default(), usage, cost)
        }
        Err(e) => TaskResult::failed(task_id, format!("Failed to parse agent output: {}", e)),
    }
}

fn excerpt(text: &str) -> &str {
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
