//! # Scribeloop Core
//!
//! Domain types, traits, and error definitions for the Scribeloop writing
//! orchestrator. This crate has **no framework dependencies**: it defines the
//! model that the engine, the built-in capabilities and the CLI all build on.
//!
//! ## Design Philosophy
//!
//! Every pluggable action is a [`Capability`] behind one trait. The
//! [`ToolRegistry`] is a plain dispatch table over them, so the engine never
//! special-cases a tool kind:
//! - new tools register without touching the engine
//! - tests swap real clients for scripted stubs
//! - all crates depend inward on core

pub mod article;
pub mod attempt;
pub mod error;
pub mod event;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use article::{Article, Artifact, ArtifactKind, FailureReport, Section};
pub use attempt::{AttemptRecord, AttemptStatus};
pub use error::{CapabilityError, ContextError, EngineError, Error, Result, TaskError, ToolError};
pub use event::{EngineEvent, EventBus, RunPhase};
pub use task::{BriefLimits, CostUnit, RetryPolicy, Task, TaskConfig, TaskId, WritingBrief};
pub use tool::{Capability, CapabilityKind, Payload, ToolCall, ToolOutput, ToolRegistry};
