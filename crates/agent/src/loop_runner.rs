//! The execution engine — one bounded, observable run per task.
//!
//! ```text
//! Planning ──CallTool──▶ Dispatching ──▶ Observing ──▶ Planning
//!    │
//!    └──Finalize──▶ Finalizing ──▶ Completed | Failed
//! ```
//!
//! Cancellation is checked before every transition and raced against
//! in-flight calls and backoff sleeps. The overall deadline is checked at
//! the top of every planning step.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scribeloop_core::article::{Article, FailureReport};
use scribeloop_core::attempt::{AttemptRecord, AttemptStatus};
use scribeloop_core::error::{EngineError, ToolError};
use scribeloop_core::event::{EngineEvent, EventBus, RunPhase};
use scribeloop_core::task::{Task, TaskConfig, TaskId};
use scribeloop_core::tool::{CapabilityKind, ToolCall, ToolOutput, ToolRegistry};

use crate::assembler::{DefaultTopicKey, ResultAssembler, TopicKey};
use crate::context::{ContextBuffer, ContextSnapshot, NewEntry};
use crate::planner::{CompletenessCheck, Decision, FinalizeReason, Planner};
use crate::retry::next_delay;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(Article),
    Failed(FailureReport),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    pub iterations: u32,
    pub attempts: Vec<AttemptRecord>,
    /// Final state of the context buffer
    pub context: ContextSnapshot,
    /// Every sequence number evicted during the run, in order
    pub evicted: Vec<u64>,
    pub elapsed_ms: u64,
}

/// Working state of one run. Owned by the run, never shared.
#[derive(Debug)]
pub struct RunState {
    pub phase: RunPhase,
    pub iteration: u32,
    pub buffer: ContextBuffer,
    pub attempts: Vec<AttemptRecord>,
    pub evicted: Vec<u64>,
    started: Instant,
}

impl RunState {
    pub fn new(config: &TaskConfig) -> Self {
        Self {
            phase: RunPhase::Planning,
            iteration: 0,
            buffer: ContextBuffer::new(config.context_budget, config.cost_unit),
            attempts: Vec::new(),
            evicted: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// The next transition of the state machine.
enum Step {
    Plan,
    Dispatch {
        name: String,
        arguments: serde_json::Value,
        language: Option<String>,
    },
    Observe {
        tool: String,
        language: Option<String>,
        output: Option<ToolOutput>,
    },
    Finalize(FinalizeReason),
    Fail(EngineError),
}

/// Why a dispatch stopped before producing an outcome.
enum Interrupt {
    Cancelled,
    Engine(EngineError),
}

/// Drives tasks through plan → dispatch → observe until they finish.
///
/// One engine serves any number of concurrent runs; it holds only shared,
/// read-only pieces.
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    planner: Planner,
    assembler: ResultAssembler,
    topic_key: Arc<dyn TopicKey>,
    event_bus: Arc<EventBus>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        let planner = Planner::new(registry.kinds());
        Self {
            registry,
            planner,
            assembler: ResultAssembler::new(),
            topic_key: Arc::new(DefaultTopicKey),
            event_bus,
        }
    }

    /// Replace the default completeness check.
    pub fn with_completeness(mut self, check: Arc<dyn CompletenessCheck>) -> Self {
        self.planner = self.planner.with_completeness(check);
        self
    }

    /// Replace the default topical key.
    pub fn with_topic_key(mut self, key: Arc<dyn TopicKey>) -> Self {
        self.topic_key = key;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Reject tasks that name unregistered tools.
    pub fn validate(&self, task: &Task) -> Result<(), EngineError> {
        self.planner.validate(task)
    }

    /// Run a task to completion, failure, or cancellation.
    ///
    /// Returns `Err` only for tasks naming unknown tools; every other ending
    /// is a [`RunReport`] whose outcome says what happened.
    pub async fn run(
        &self,
        task: Arc<Task>,
        cancel: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        self.validate(&task)?;

        info!(
            task_id = %task.id,
            topic = %task.topic,
            required = ?task.config.required_capabilities,
            optional = ?task.config.optional_capabilities,
            "Starting task"
        );

        let mut state = RunState::new(&task.config);
        self.transition(&task, &mut state, RunPhase::Planning);
        let mut step = Step::Plan;

        let outcome = loop {
            if cancel.is_cancelled() {
                step = Step::Fail(EngineError::Cancelled);
            }

            step = match step {
                Step::Plan => self.plan(&task, &mut state)?,
                Step::Dispatch {
                    name,
                    arguments,
                    language,
                } => {
                    self.transition(&task, &mut state, RunPhase::Dispatching);
                    let call = ToolCall::new(name, arguments);
                    match self.dispatch(&task, &mut state, call, language, &cancel).await {
                        Ok(observe) => observe,
                        Err(Interrupt::Cancelled) => Step::Fail(EngineError::Cancelled),
                        Err(Interrupt::Engine(e)) => return Err(e),
                    }
                }
                Step::Observe {
                    tool,
                    language,
                    output,
                } => {
                    self.transition(&task, &mut state, RunPhase::Observing);
                    self.observe(&task, &mut state, &tool, language, output);
                    self.transition(&task, &mut state, RunPhase::Planning);
                    Step::Plan
                }
                Step::Finalize(reason) => {
                    self.transition(&task, &mut state, RunPhase::Finalizing);
                    break self.finalize(&task, &mut state, reason);
                }
                Step::Fail(reason) => break self.fail(&task, &mut state, reason),
            };
        };

        info!(
            task_id = %task.id,
            completed = outcome.is_completed(),
            iterations = state.iteration,
            attempts = state.attempts.len(),
            elapsed_ms = state.elapsed_ms(),
            "Task finished"
        );

        Ok(RunReport {
            task_id: task.id,
            outcome,
            iterations: state.iteration,
            context: state.buffer.snapshot(),
            elapsed_ms: state.elapsed_ms(),
            attempts: state.attempts,
            evicted: state.evicted,
        })
    }

    // ── Transitions ──

    fn transition(&self, task: &Task, state: &mut RunState, phase: RunPhase) {
        state.phase = phase;
        let elapsed_ms = state.elapsed_ms();
        debug!(
            task_id = %task.id,
            phase = %phase,
            iteration = state.iteration,
            elapsed_ms,
            "State transition"
        );
        self.event_bus.publish(EngineEvent::StateChanged {
            task_id: task.id,
            phase,
            iteration: state.iteration,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    fn plan(&self, task: &Task, state: &mut RunState) -> Result<Step, EngineError> {
        if let Some(deadline) = task.config.deadline {
            if state.started.elapsed() >= deadline {
                warn!(task_id = %task.id, "Task deadline exceeded");
                return Ok(Step::Fail(EngineError::DeadlineExceeded {
                    deadline_ms: deadline.as_millis() as u64,
                }));
            }
        }

        let snapshot = state.buffer.snapshot();
        let decision = self
            .planner
            .decide(task, &snapshot, &state.attempts, state.iteration)?;

        Ok(match decision {
            Decision::CallTool {
                name,
                arguments,
                language,
            } => Step::Dispatch {
                name,
                arguments,
                language,
            },
            Decision::Finalize(reason) => {
                debug!(task_id = %task.id, ?reason, "Planner chose to finalize");
                Step::Finalize(reason)
            }
        })
    }

    /// Execute one tool call with timeout, retry and backoff.
    ///
    /// Returns the payload on success, `None` once the call has failed for
    /// good. Every finished attempt is recorded; an abandoned one is not.
    async fn dispatch(
        &self,
        task: &Task,
        state: &mut RunState,
        call: ToolCall,
        language: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Step, Interrupt> {
        let config = &task.config;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(task_id = %task.id, tool = %call.name, attempt, "Call abandoned on cancellation");
                    return Err(Interrupt::Cancelled);
                }
                result = self.registry.invoke(&call.name, call.arguments.clone(), config.per_call_timeout) => result,
            };
            let latency = started.elapsed();

            match result {
                Ok(output) => {
                    self.record(
                        task,
                        state,
                        AttemptRecord::success(&call.id, &call.name, attempt, latency)
                            .with_language(language.clone()),
                    );
                    return Ok(Step::Observe {
                        tool: call.name,
                        language,
                        output: Some(output),
                    });
                }
                Err(ToolError::UnknownTool(name)) => {
                    return Err(Interrupt::Engine(EngineError::UnknownTool { name }));
                }
                Err(e) if e.is_retriable() && attempt < config.max_attempts_per_call => {
                    self.record(
                        task,
                        state,
                        AttemptRecord::failure(
                            &call.id,
                            &call.name,
                            attempt,
                            AttemptStatus::RetriableFailure,
                            latency,
                            e.to_string(),
                        )
                        .with_language(language.clone()),
                    );

                    let delay = next_delay(&config.retry, attempt);
                    debug!(task_id = %task.id, tool = %call.name, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_retriable() {
                        warn!(task_id = %task.id, tool = %call.name, attempts = attempt, "Retries exhausted");
                    }
                    self.record(
                        task,
                        state,
                        AttemptRecord::failure(
                            &call.id,
                            &call.name,
                            attempt,
                            AttemptStatus::FatalFailure,
                            latency,
                            e.to_string(),
                        )
                        .with_language(language.clone()),
                    );
                    return Ok(Step::Observe {
                        tool: call.name,
                        language,
                        output: None,
                    });
                }
            }
        }
    }

    fn record(&self, task: &Task, state: &mut RunState, record: AttemptRecord) {
        match record.status {
            AttemptStatus::Success => {
                debug!(task_id = %task.id, tool = %record.tool, attempt = record.attempt, latency_ms = record.latency_ms, "Tool call succeeded")
            }
            _ => warn!(
                task_id = %task.id,
                tool = %record.tool,
                attempt = record.attempt,
                status = ?record.status,
                error = record.error.as_deref().unwrap_or_default(),
                "Tool call failed"
            ),
        }
        self.event_bus.publish(EngineEvent::ToolAttempted {
            task_id: task.id,
            tool: record.tool.clone(),
            attempt: record.attempt,
            status: record.status,
            latency_ms: record.latency_ms,
            timestamp: Utc::now(),
        });
        state.attempts.push(record);
    }

    /// Fold a call's result into the context and count the iteration.
    fn observe(
        &self,
        task: &Task,
        state: &mut RunState,
        tool: &str,
        language: Option<String>,
        output: Option<ToolOutput>,
    ) {
        state.iteration += 1;

        let Some(output) = output else {
            if !task.config.is_required(tool) {
                let detail = state
                    .attempts
                    .last()
                    .and_then(|a| a.error.clone())
                    .unwrap_or_default();
                self.append_note(task, state, format!("Optional tool '{tool}' failed: {detail}"));
            }
            return;
        };

        let topic = self.topic_key.key(tool, &output);
        let kind = self
            .registry
            .kind(tool)
            .unwrap_or_else(|| CapabilityKind::Custom(tool.to_string()));
        let entry = if kind.is_retrieval() {
            NewEntry::retrieval(tool, topic, output.payload)
        } else {
            NewEntry::plugin_output(tool, kind, topic, output.payload).with_language(language)
        };

        match state.buffer.append(entry) {
            Ok(appended) => {
                debug!(
                    task_id = %task.id,
                    tool,
                    seq = appended.seq,
                    total_cost = state.buffer.total_cost(),
                    "Context entry appended"
                );
                self.note_evictions(task, state, appended.evicted);
            }
            Err(e) => {
                warn!(task_id = %task.id, tool, error = %e, "Context buffer rejected tool output");
                self.append_note(task, state, format!("Output of '{tool}' was not stored: {e}"));
            }
        }
    }

    fn append_note(&self, task: &Task, state: &mut RunState, text: String) {
        match state.buffer.append(NewEntry::plan_note(text)) {
            Ok(appended) => self.note_evictions(task, state, appended.evicted),
            Err(e) => debug!(task_id = %task.id, error = %e, "Plan note dropped"),
        }
    }

    fn note_evictions(&self, task: &Task, state: &mut RunState, evicted: Vec<u64>) {
        if evicted.is_empty() {
            return;
        }
        debug!(task_id = %task.id, ?evicted, "Evicted context entries");
        state.evicted.extend_from_slice(&evicted);
        self.event_bus.publish(EngineEvent::ContextEvicted {
            task_id: task.id,
            evicted,
            timestamp: Utc::now(),
        });
    }

    fn finalize(&self, task: &Task, state: &mut RunState, reason: FinalizeReason) -> TaskOutcome {
        let result = match reason {
            FinalizeReason::RequiredToolFailed { tool, detail } => {
                Err(EngineError::RequiredToolFailed { tool, detail })
            }
            reason => {
                if reason == FinalizeReason::IterationLimit {
                    warn!(task_id = %task.id, iterations = state.iteration, "Iteration limit reached");
                }
                self.assembler.assemble(task, &state.buffer.snapshot())
            }
        };

        match result {
            Ok(article) => {
                self.transition(task, state, RunPhase::Completed);
                TaskOutcome::Completed(article)
            }
            Err(reason) => self.fail(task, state, reason),
        }
    }

    fn fail(&self, task: &Task, state: &mut RunState, reason: EngineError) -> TaskOutcome {
        warn!(task_id = %task.id, reason = %reason, "Task failed");
        self.transition(task, state, RunPhase::Failed);
        TaskOutcome::Failed(FailureReport {
            task_id: task.id,
            reason,
            iterations: state.iteration,
            attempts: state.attempts.clone(),
            elapsed_ms: state.elapsed_ms(),
        })
    }
}
