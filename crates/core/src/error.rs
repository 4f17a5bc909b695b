//! Error types for the Scribeloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] unifies them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Scribeloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool registry errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Engine / run errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Task validation errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Context buffer errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A failure reported by a capability implementation itself.
///
/// Capabilities classify their own failures; the registry asks
/// [`Capability::is_retriable`](crate::tool::Capability::is_retriable) which
/// by default treats only `Transient` as retriable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal failure: {0}")]
    Fatal(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Tool timed out: {tool} after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool failed transiently: {tool}: {source}")]
    Retriable {
        tool: String,
        #[source]
        source: CapabilityError,
    },

    #[error("Tool execution failed: {tool}: {source}")]
    Execution {
        tool: String,
        #[source]
        source: CapabilityError,
    },
}

impl ToolError {
    /// Whether the engine may retry the call that produced this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Retriable { .. })
    }
}

/// Errors that end a run, or that reject a run before it starts.
///
/// Serializable so it can travel inside a [`FailureReport`](crate::article::FailureReport).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Required tool '{tool}' failed: {detail}")]
    RequiredToolFailed { tool: String, detail: String },

    #[error("Insufficient context: no retrieval evidence to assemble an article")]
    InsufficientContext,

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Entry cost {cost} exceeds the whole context budget of {budget}")]
    ExceedsBudget { cost: usize, budget: usize },

    #[error("No room for entry cost {cost}: {used}/{budget} used by entries it may not evict")]
    NoRoom {
        cost: usize,
        used: usize,
        budget: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Topic is {len} characters, max is {max}")]
    TopicTooLong { len: usize, max: usize },

    #[error("Unsupported style '{style}'. Supported: {supported}")]
    UnsupportedStyle { style: String, supported: String },

    #[error("Unsupported language '{language}'. Supported: {supported}")]
    UnsupportedLanguage { language: String, supported: String },

    #[error("Too many keywords: {count} (max {max})")]
    TooManyKeywords { count: usize, max: usize },

    #[error("Too many focus areas: {count} (max {max})")]
    TooManyFocusAreas { count: usize, max: usize },

    #[error("max_sources {value} is out of range 1..={limit}")]
    MaxSourcesOutOfRange { value: u32, limit: u32 },

    #[error("Invalid task configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::Execution {
            tool: "translation".into(),
            source: CapabilityError::Fatal("quota exhausted".into()),
        });
        assert!(err.to_string().contains("translation"));
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[test]
    fn retriable_classification() {
        assert!(
            ToolError::Timeout {
                tool: "pubmed".into(),
                timeout_ms: 100
            }
            .is_retriable()
        );
        assert!(
            ToolError::Retriable {
                tool: "pubmed".into(),
                source: CapabilityError::Transient("503".into()),
            }
            .is_retriable()
        );
        assert!(!ToolError::UnknownTool("x".into()).is_retriable());
        assert!(
            !ToolError::Execution {
                tool: "pubmed".into(),
                source: CapabilityError::Fatal("400".into()),
            }
            .is_retriable()
        );
    }

    #[test]
    fn engine_error_serializes_with_kind_tag() {
        let err = EngineError::RequiredToolFailed {
            tool: "translation".into(),
            detail: "boom".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""kind":"required_tool_failed""#));
        assert!(json.contains("translation"));
    }
}
