//! Attempt records — the diagnostic trail of every tool execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome class of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    RetriableFailure,
    FatalFailure,
}

/// The outcome of one execution of a tool call.
///
/// Appended to the attempt log of a run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// The tool call this attempt belongs to
    pub call_id: String,
    pub tool: String,
    /// 1-based attempt number within the call
    pub attempt: u32,
    pub status: AttemptStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target language, for calls that fan out per language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn success(call_id: &str, tool: &str, attempt: u32, latency: Duration) -> Self {
        Self::new(call_id, tool, attempt, AttemptStatus::Success, latency, None)
    }

    pub fn failure(
        call_id: &str,
        tool: &str,
        attempt: u32,
        status: AttemptStatus,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self::new(call_id, tool, attempt, status, latency, Some(error.into()))
    }

    fn new(
        call_id: &str,
        tool: &str,
        attempt: u32,
        status: AttemptStatus,
        latency: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            attempt,
            status,
            latency_ms: latency.as_millis() as u64,
            error,
            language: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }

    pub fn is_fatal(&self) -> bool {
        self.status == AttemptStatus::FatalFailure
    }
}
