//! The execution engine — the heart of Scribeloop.
//!
//! A task runs through a **Plan → Dispatch → Observe** cycle:
//!
//! 1. **Plan**: pick the next tool call, or decide to finalize
//! 2. **Dispatch**: run the call under a timeout, retrying transient failures
//! 3. **Observe**: fold the result into the budget-bounded context buffer
//! 4. **Finalize**: assemble the article from the evidence gathered
//!
//! The loop ends when the planner finalizes, the iteration limit is reached,
//! a required tool fails, the deadline passes, or the caller cancels.

pub mod assembler;
pub mod context;
pub mod loop_runner;
pub mod planner;
pub mod retry;
pub mod service;

#[cfg(test)]
mod test_helpers;

pub use assembler::{DefaultTopicKey, ResultAssembler, TopicKey};
pub use context::{Appended, ContextBuffer, ContextEntry, ContextSnapshot, EntryKind, NewEntry};
pub use loop_runner::{ExecutionEngine, RunReport, RunState, TaskOutcome};
pub use planner::{CompletenessCheck, Decision, DefaultCompleteness, FinalizeReason, Planner};
pub use service::{TaskService, TaskStatus};
