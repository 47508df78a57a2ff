//! Thinking Trace
//!
//! Per-turn, append-only record of what the engine did, in causal order.
//! Façades render it next to the answer or stream it step by step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Kind of step in a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStepType {
    UserInput,
    ToolPlanning,
    ToolExecution,
    ToolResult,
    Reasoning,
    FinalResponse,
}

/// One trace event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinkingStep {
    #[serde(rename = "type")]
    pub step_type: ThinkingStepType,

    /// Short label for display
    pub title: String,

    /// Step detail; tool results are truncated here, never in the conversation
    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// Wall-clock duration of the bracketed operation, when timed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ThinkingStep {
    pub fn new(
        step_type: ThinkingStepType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            step_type,
            title: title.into(),
            content: content.into(),
            timestamp: Utc::now(),
            duration_ms: None,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Ordered steps of the current turn
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThinkingTrace {
    steps: Vec<ThinkingStep>,
}

impl ThinkingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: ThinkingStep) {
        tracing::trace!(step = ?step.step_type, title = %step.title, "Thinking step");
        self.steps.push(step);
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn steps(&self) -> &[ThinkingStep] {
        &self.steps
    }

    /// Number of steps of one kind
    pub fn count(&self, step_type: ThinkingStepType) -> usize {
        self.steps.iter().filter(|s| s.step_type == step_type).count()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Hand the steps to the caller, leaving the trace empty
    pub fn take(&mut self) -> Vec<ThinkingStep> {
        std::mem::take(&mut self.steps)
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_serializes_snake_case_type() {
        let step = ThinkingStep::new(ThinkingStepType::ToolResult, "Result", "42")
            .with_duration(Duration::from_millis(12))
            .with_metadata("tool", json!("calculator"));
        let value = serde_json::to_value(&step).unwrap();

        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["duration_ms"], 12);
        assert_eq!(value["metadata"]["tool"], "calculator");
    }

    #[test]
    fn test_trace_counts_and_take() {
        let mut trace = ThinkingTrace::new();
        trace.push(ThinkingStep::new(ThinkingStepType::UserInput, "User", "hi"));
        trace.push(ThinkingStep::new(ThinkingStepType::ToolExecution, "Run", "a"));
        trace.push(ThinkingStep::new(ThinkingStepType::ToolExecution, "Run", "b"));

        assert_eq!(trace.count(ThinkingStepType::ToolExecution), 2);
        assert_eq!(trace.count(ThinkingStepType::Reasoning), 0);

        let steps = trace.take();
        assert_eq!(steps.len(), 3);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééééé", 2), "éé...");
    }
}
