//! Engine events — observable state transitions and tool attempts.
//!
//! The engine publishes here on every phase change, every tool attempt and
//! every eviction. The CLI renders them as progress lines; tests use them to
//! assert ordering without reaching into engine internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::attempt::AttemptStatus;
use crate::task::TaskId;

/// Phases of one execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Dispatching,
    Observing,
    Finalizing,
    Completed,
    Failed,
}

impl RunPhase {
    /// `Completed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::Observing => "observing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine reports while a task runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The run moved into a new phase
    StateChanged {
        task_id: TaskId,
        phase: RunPhase,
        iteration: u32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A single tool execution finished (successfully or not)
    ToolAttempted {
        task_id: TaskId,
        tool: String,
        attempt: u32,
        status: AttemptStatus,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Appending to the context buffer evicted older entries
    ContextEvicted {
        task_id: TaskId,
        evicted: Vec<u64>,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::StateChanged { task_id, .. }
            | Self::ToolAttempted { task_id, .. }
            | Self::ContextEvicted { task_id, .. } => *task_id,
        }
    }
}

/// A broadcast-based bus for engine events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and drop events; the engine never blocks on them.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
