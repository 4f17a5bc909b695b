//! Plan/Decide — picks the next action from the current run state.
//!
//! [`Planner::decide`] is a pure function of the task, a context snapshot,
//! the attempt log and the iteration count. Rules, in priority order:
//!
//! 1. The last attempt was a fatal failure of a required tool → finalize
//!    with that failure.
//! 2. The iteration limit is reached → finalize.
//! 3. The completeness check passes → finalize. Otherwise call the first
//!    required tool without a success, then each optional tool once.
//!    Nothing left to call → finalize.
//!
//! Translation tools fan out: one call per target language in the brief,
//! each tracked on its own.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use scribeloop_core::attempt::AttemptRecord;
use scribeloop_core::error::EngineError;
use scribeloop_core::task::Task;
use scribeloop_core::tool::CapabilityKind;

use crate::context::ContextSnapshot;

/// Evidence passed to translation and custom tools is capped at this many chars.
pub const MAX_EVIDENCE_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FinalizeReason {
    /// The completeness check passed
    Complete,
    IterationLimit,
    /// No tool left to call
    Exhausted,
    /// A required tool failed fatally; the task fails
    RequiredToolFailed { tool: String, detail: String },
}

impl FinalizeReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RequiredToolFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    CallTool {
        name: String,
        arguments: serde_json::Value,
        /// Target language, for translation calls
        language: Option<String>,
    },
    Finalize(FinalizeReason),
}

/// Decides when a run has gathered enough to finalize.
pub trait CompletenessCheck: Send + Sync {
    fn is_complete(
        &self,
        task: &Task,
        snapshot: &ContextSnapshot,
        attempts: &[AttemptRecord],
    ) -> bool;
}

/// At least one retrieval entry, and every required tool has succeeded.
///
/// A tool called per target language has succeeded once every language in
/// the brief has a successful call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCompleteness;

impl CompletenessCheck for DefaultCompleteness {
    fn is_complete(
        &self,
        task: &Task,
        snapshot: &ContextSnapshot,
        attempts: &[AttemptRecord],
    ) -> bool {
        snapshot.has_retrieval()
            && task
                .config
                .required_capabilities
                .iter()
                .all(|name| satisfied(task, attempts, name))
    }
}

fn satisfied(task: &Task, attempts: &[AttemptRecord], tool: &str) -> bool {
    let per_language = attempts
        .iter()
        .any(|a| a.tool == tool && a.language.is_some());
    if per_language {
        task.brief
            .translate_to
            .iter()
            .all(|lang| succeeded(attempts, tool, Some(lang)))
    } else {
        succeeded(attempts, tool, None)
    }
}

fn succeeded(attempts: &[AttemptRecord], tool: &str, language: Option<&str>) -> bool {
    attempts
        .iter()
        .any(|a| a.tool == tool && a.language.as_deref() == language && a.is_success())
}

fn attempted(attempts: &[AttemptRecord], tool: &str, language: Option<&str>) -> bool {
    attempts
        .iter()
        .any(|a| a.tool == tool && a.language.as_deref() == language)
}

#[derive(Clone)]
pub struct Planner {
    kinds: HashMap<String, CapabilityKind>,
    completeness: Arc<dyn CompletenessCheck>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("tools", &self.kinds.len())
            .finish_non_exhaustive()
    }
}

impl Planner {
    /// `kinds` maps every registered tool name to its capability kind.
    pub fn new(kinds: HashMap<String, CapabilityKind>) -> Self {
        Self {
            kinds,
            completeness: Arc::new(DefaultCompleteness),
        }
    }

    pub fn with_completeness(mut self, check: Arc<dyn CompletenessCheck>) -> Self {
        self.completeness = check;
        self
    }

    /// Every tool the task names must be registered.
    pub fn validate(&self, task: &Task) -> Result<(), EngineError> {
        match task
            .config
            .all_capabilities()
            .find(|name| !self.kinds.contains_key(*name))
        {
            Some(name) => Err(EngineError::UnknownTool {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn decide(
        &self,
        task: &Task,
        snapshot: &ContextSnapshot,
        attempts: &[AttemptRecord],
        iteration: u32,
    ) -> Result<Decision, EngineError> {
        if let Some(last) = attempts.last() {
            if last.is_fatal() && task.config.is_required(&last.tool) {
                return Ok(Decision::Finalize(FinalizeReason::RequiredToolFailed {
                    tool: last.tool.clone(),
                    detail: last.error.clone().unwrap_or_default(),
                }));
            }
        }

        if iteration >= task.config.max_iterations {
            return Ok(Decision::Finalize(FinalizeReason::IterationLimit));
        }

        if self.completeness.is_complete(task, snapshot, attempts) {
            return Ok(Decision::Finalize(FinalizeReason::Complete));
        }

        let config = &task.config;
        let next = config
            .required_capabilities
            .iter()
            .flat_map(|name| self.calls_for(task, name))
            .find(|(name, lang)| !succeeded(attempts, name, lang.as_deref()))
            .or_else(|| {
                let all_required_tried = config
                    .required_capabilities
                    .iter()
                    .flat_map(|name| self.calls_for(task, name))
                    .all(|(name, lang)| attempted(attempts, name, lang.as_deref()));
                if !all_required_tried {
                    return None;
                }
                config
                    .optional_capabilities
                    .iter()
                    .flat_map(|name| self.calls_for(task, name))
                    .find(|(name, lang)| !attempted(attempts, name, lang.as_deref()))
            });

        let Some((name, language)) = next else {
            return Ok(Decision::Finalize(FinalizeReason::Exhausted));
        };

        let kind = self
            .kinds
            .get(name)
            .ok_or_else(|| EngineError::UnknownTool { name: name.to_string() })?;

        Ok(Decision::CallTool {
            name: name.to_string(),
            arguments: arguments_for(task, kind, snapshot, language.as_deref()),
            language,
        })
    }

    /// Every call `name` needs: one per target language for translation
    /// tools, a single unlabelled call otherwise.
    fn calls_for<'a>(&self, task: &Task, name: &'a str) -> Vec<(&'a str, Option<String>)> {
        match self.kinds.get(name) {
            Some(CapabilityKind::Translation) if !task.brief.translate_to.is_empty() => task
                .brief
                .translate_to
                .iter()
                .map(|lang| (name, Some(lang.clone())))
                .collect(),
            _ => vec![(name, None)],
        }
    }
}

/// Shape call arguments from the brief and the capability kind.
pub fn arguments_for(
    task: &Task,
    kind: &CapabilityKind,
    snapshot: &ContextSnapshot,
    language: Option<&str>,
) -> serde_json::Value {
    let brief = &task.brief;
    match kind {
        CapabilityKind::Retrieval => json!({
            "topic": task.topic,
            "keywords": brief.keywords,
            "focus_areas": brief.focus_areas,
            "max_results": brief.max_sources.unwrap_or(5),
        }),
        CapabilityKind::Translation => json!({
            "text": truncate_chars(&snapshot.evidence_text(), MAX_EVIDENCE_CHARS),
            "source_language": brief.language,
            "target_language": language,
        }),
        CapabilityKind::ImageGeneration => json!({
            "scene_description": format!(
                "A descriptive image for an article titled '{}'",
                task.topic
            ),
            "style": brief.style,
        }),
        CapabilityKind::Custom(_) => json!({
            "topic": task.topic,
            "brief": brief,
            "evidence": truncate_chars(&snapshot.evidence_text(), MAX_EVIDENCE_CHARS),
        }),
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
