//! Task model — the unit of work submitted by a caller.
//!
//! A [`Task`] bundles the topic, the caller's [`WritingBrief`] and the
//! run limits in [`TaskConfig`]. It is immutable once created and shared
//! read-only with the engine run that executes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::TaskError;

/// Maximum topic length accepted by [`Task::new`].
pub const MAX_TOPIC_CHARS: usize = 500;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Exponential backoff settings for retriable tool failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Handy in tests.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }
}

/// How entry costs are measured against the context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostUnit {
    Bytes,
    #[default]
    Tokens,
}

/// Run limits and capability selection for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Upper bound on tool-call iterations.
    pub max_iterations: u32,
    /// Timeout applied to every single capability call.
    pub per_call_timeout: Duration,
    /// Attempts per tool call, including the first one.
    pub max_attempts_per_call: u32,
    /// Context buffer budget, in `cost_unit`.
    pub context_budget: usize,
    pub cost_unit: CostUnit,
    /// Tools whose fatal failure ends the task; called in this order.
    pub required_capabilities: Vec<String>,
    /// Tools tried once each after every required tool was attempted.
    pub optional_capabilities: Vec<String>,
    pub retry: RetryPolicy,
    /// Overall deadline, checked before every planning step.
    pub deadline: Option<Duration>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            per_call_timeout: Duration::from_secs(60),
            max_attempts_per_call: 3,
            context_budget: 8192,
            cost_unit: CostUnit::Tokens,
            required_capabilities: Vec::new(),
            optional_capabilities: Vec::new(),
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

impl TaskConfig {
    pub fn with_required(mut self, names: &[&str]) -> Self {
        self.required_capabilities = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_optional(mut self, names: &[&str]) -> Self {
        self.optional_capabilities = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether `name` is a required capability.
    pub fn is_required(&self, name: &str) -> bool {
        self.required_capabilities.iter().any(|r| r == name)
    }

    /// Required capabilities first, then optional ones.
    pub fn all_capabilities(&self) -> impl Iterator<Item = &str> {
        self.required_capabilities
            .iter()
            .chain(self.optional_capabilities.iter())
            .map(|s| s.as_str())
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.max_iterations == 0 {
            return Err(TaskError::InvalidConfig("max_iterations must be > 0".into()));
        }
        if self.max_attempts_per_call == 0 {
            return Err(TaskError::InvalidConfig(
                "max_attempts_per_call must be > 0".into(),
            ));
        }
        if self.context_budget == 0 {
            return Err(TaskError::InvalidConfig("context_budget must be > 0".into()));
        }
        if self.per_call_timeout.is_zero() {
            return Err(TaskError::InvalidConfig(
                "per_call_timeout must be > 0".into(),
            ));
        }
        let mut seen = HashSet::new();
        for name in self.all_capabilities() {
            if !seen.insert(name) {
                return Err(TaskError::InvalidConfig(format!(
                    "capability '{name}' listed more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Limits and defaults applied to a [`WritingBrief`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefLimits {
    pub supported_styles: Vec<String>,
    pub supported_languages: Vec<String>,
    pub default_style: String,
    pub default_language: String,
    pub max_keywords: usize,
    pub max_focus_areas: usize,
    pub default_max_sources: u32,
    pub max_sources_limit: u32,
}

impl Default for BriefLimits {
    fn default() -> Self {
        Self {
            supported_styles: vec![
                "popular science article".into(),
                "review".into(),
                "blog post".into(),
            ],
            supported_languages: vec![
                "en".into(),
                "zh-CN".into(),
                "zh-TW".into(),
                "ja".into(),
                "fr".into(),
            ],
            default_style: "popular science article".into(),
            default_language: "en".into(),
            max_keywords: 10,
            max_focus_areas: 5,
            default_max_sources: 5,
            max_sources_limit: 20,
        }
    }
}

/// Caller-supplied parameters shaping the article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingBrief {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default = "default_true")]
    pub include_references: bool,
    #[serde(default)]
    pub max_sources: Option<u32>,
    #[serde(default)]
    pub translate_to: Vec<String>,
    #[serde(default)]
    pub generate_images: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WritingBrief {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            focus_areas: Vec::new(),
            style: None,
            language: None,
            instructions: None,
            include_references: true,
            max_sources: None,
            translate_to: Vec::new(),
            generate_images: false,
        }
    }
}

impl WritingBrief {
    /// Clean up and validate the brief against `limits`, filling in defaults.
    pub fn normalize(&mut self, limits: &BriefLimits) -> Result<(), TaskError> {
        self.keywords = dedup_preserve_order(&self.keywords);
        self.focus_areas = dedup_preserve_order(&self.focus_areas);
        self.translate_to = dedup_preserve_order(&self.translate_to);

        if self.keywords.len() > limits.max_keywords {
            return Err(TaskError::TooManyKeywords {
                count: self.keywords.len(),
                max: limits.max_keywords,
            });
        }
        if self.focus_areas.len() > limits.max_focus_areas {
            return Err(TaskError::TooManyFocusAreas {
                count: self.focus_areas.len(),
                max: limits.max_focus_areas,
            });
        }

        match trimmed(&self.style) {
            Some(style) if !limits.supported_styles.contains(&style) => {
                return Err(TaskError::UnsupportedStyle {
                    style,
                    supported: limits.supported_styles.join(", "),
                });
            }
            Some(style) => self.style = Some(style),
            None => self.style = Some(limits.default_style.clone()),
        }

        match trimmed(&self.language) {
            Some(lang) if !limits.supported_languages.contains(&lang) => {
                return Err(TaskError::UnsupportedLanguage {
                    language: lang,
                    supported: limits.supported_languages.join(", "),
                });
            }
            Some(lang) => self.language = Some(lang),
            None => self.language = Some(limits.default_language.clone()),
        }

        for lang in &self.translate_to {
            if !limits.supported_languages.iter().any(|l| l == lang) {
                return Err(TaskError::UnsupportedLanguage {
                    language: lang.clone(),
                    supported: limits.supported_languages.join(", "),
                });
            }
        }

        match self.max_sources {
            Some(value) if value == 0 || value > limits.max_sources_limit => {
                return Err(TaskError::MaxSourcesOutOfRange {
                    value,
                    limit: limits.max_sources_limit,
                });
            }
            Some(_) => {}
            None => self.max_sources = Some(limits.default_max_sources),
        }

        Ok(())
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Trim, drop blanks and duplicates, keep first occurrence order.
fn dedup_preserve_order(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
        .map(str::to_string)
        .collect()
}

/// The unit of work: one end-to-end request to produce an article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub topic: String,
    pub brief: WritingBrief,
    pub config: TaskConfig,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task, validating the topic and configuration.
    pub fn new(topic: impl Into<String>, config: TaskConfig) -> Result<Self, TaskError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(TaskError::EmptyTopic);
        }
        let len = topic.chars().count();
        if len > MAX_TOPIC_CHARS {
            return Err(TaskError::TopicTooLong {
                len,
                max: MAX_TOPIC_CHARS,
            });
        }
        config.validate()?;
        Ok(Self {
            id: TaskId::new(),
            topic,
            brief: WritingBrief::default(),
            config,
            created_at: Utc::now(),
        })
    }

    /// Attach the writing brief (before the task is handed to the engine).
    pub fn with_brief(mut self, brief: WritingBrief) -> Self {
        self.brief = brief;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_rejects_blank_topic() {
        assert_eq!(
            Task::new("   ", TaskConfig::default()).unwrap_err(),
            TaskError::EmptyTopic
        );
    }

    #[test]
    fn task_rejects_long_topic() {
        let topic = "x".repeat(MAX_TOPIC_CHARS + 1);
        assert!(matches!(
            Task::new(topic, TaskConfig::default()),
            Err(TaskError::TopicTooLong { .. })
        ));
    }

    #[test]
    fn task_trims_topic_and_assigns_id() {
        let a = Task::new("  gut microbiome  ", TaskConfig::default()).unwrap();
        let b = Task::new("gut microbiome", TaskConfig::default()).unwrap();
        assert_eq!(a.topic, "gut microbiome");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn config_validation() {
        let zero_iter = TaskConfig {
            max_iterations: 0,
            ..TaskConfig::default()
        };
        assert!(zero_iter.validate().is_err());

        let dup = TaskConfig::default()
            .with_required(&["pubmed"])
            .with_optional(&["pubmed"]);
        assert!(dup.validate().is_err());

        assert!(TaskConfig::default().validate().is_ok());
    }

    #[test]
    fn task_id_parses_from_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn brief_dedups_and_applies_defaults() {
        let mut brief = WritingBrief {
            keywords: vec![" crispr ".into(), "crispr".into(), "".into(), "ethics".into()],
            ..WritingBrief::default()
        };
        brief.normalize(&BriefLimits::default()).unwrap();
        assert_eq!(brief.keywords, vec!["crispr", "ethics"]);
        assert_eq!(brief.style.as_deref(), Some("popular science article"));
        assert_eq!(brief.language.as_deref(), Some("en"));
        assert_eq!(brief.max_sources, Some(5));
    }

    #[test]
    fn brief_rejects_unsupported_style_and_language() {
        let limits = BriefLimits::default();

        let mut brief = WritingBrief {
            style: Some("sonnet".into()),
            ..WritingBrief::default()
        };
        assert!(matches!(
            brief.normalize(&limits),
            Err(TaskError::UnsupportedStyle { .. })
        ));

        let mut brief = WritingBrief {
            translate_to: vec!["xx".into()],
            ..WritingBrief::default()
        };
        assert!(matches!(
            brief.normalize(&limits),
            Err(TaskError::UnsupportedLanguage { .. })
        ));
    }

    #[test]
    fn brief_enforces_limits() {
        let limits = BriefLimits::default();

        let mut brief = WritingBrief {
            keywords: (0..11).map(|i| format!("k{i}")).collect(),
            ..WritingBrief::default()
        };
        assert!(matches!(
            brief.normalize(&limits),
            Err(TaskError::TooManyKeywords { count: 11, max: 10 })
        ));

        let mut brief = WritingBrief {
            max_sources: Some(21),
            ..WritingBrief::default()
        };
        assert!(matches!(
            brief.normalize(&limits),
            Err(TaskError::MaxSourcesOutOfRange { value: 21, limit: 20 })
        ));
    }
}
