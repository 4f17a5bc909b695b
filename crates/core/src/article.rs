//! Run results — the assembled [`Article`] or a typed [`FailureReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attempt::AttemptRecord;
use crate::error::EngineError;
use crate::task::TaskId;
use crate::tool::Payload;

/// One body section, grouped by topical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub body: String,
    /// Sequence numbers of the context entries this section drew from.
    pub provenance: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Translation,
    Other,
}

/// A plugin-produced artifact, kept apart from the body so renderers can
/// choose where it goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Tool that produced it
    pub source: String,
    pub payload: Payload,
    /// Target language of a translation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Sequence number of the originating context entry
    pub seq: u64,
}

/// JSON envelope shared by both run endings.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Rendered<'a> {
    Completed { article: &'a Article },
    Failed { report: &'a FailureReport },
}

/// The final output of a successful task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub task_id: TaskId,
    pub title: String,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.body.split_whitespace().count())
            .sum()
    }

    /// Render the article as Markdown, artifacts listed at the end.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n{}\n\n", section.heading, section.body.trim()));
        }
        if !self.artifacts.is_empty() {
            out.push_str("## Artifacts\n\n");
            for artifact in &self.artifacts {
                let label = match &artifact.language {
                    Some(lang) => format!("{} [{lang}]", artifact.source),
                    None => artifact.source.clone(),
                };
                match &artifact.payload {
                    Payload::Reference { uri, media_type } => out.push_str(&format!(
                        "- [{}] {} ({}, {})\n",
                        artifact.seq, uri, media_type, label
                    )),
                    Payload::Text { text } => out.push_str(&format!(
                        "- [{}] {} ({} chars)\n",
                        artifact.seq,
                        label,
                        text.chars().count()
                    )),
                }
            }
        }
        out
    }

    /// Translations keyed by target language.
    pub fn translations(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.artifacts.iter().filter_map(|a| match (a.kind, &a.language) {
            (ArtifactKind::Translation, Some(lang)) => Some((lang.as_str(), a)),
            _ => None,
        })
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&Rendered::Completed { article: self })?)
    }
}

/// Why and where a task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: TaskId,
    pub reason: EngineError,
    pub iterations: u32,
    pub attempts: Vec<AttemptRecord>,
    pub elapsed_ms: u64,
}

impl FailureReport {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&Rendered::Failed { report: self })?)
    }
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task {} failed after {} iteration(s): {}",
            self.task_id, self.iterations, self.reason
        )
    }
}
