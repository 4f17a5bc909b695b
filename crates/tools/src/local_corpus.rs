//! Local corpus retrieval — keyword search over a directory of notes.
//!
//! Scores every `.md`/`.txt` file in the directory by how often the topic
//! and keyword terms occur and returns previews of the best matches.

use async_trait::async_trait;
use scribeloop_core::error::CapabilityError;
use scribeloop_core::tool::{Capability, CapabilityKind, ToolOutput};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{preview, string_list};

const TOPIC: &str = "Background notes";

pub struct LocalCorpusTool {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusHit {
    pub source: String,
    pub score: usize,
    pub preview: String,
}

impl LocalCorpusTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn search(&self, terms: &[String], limit: usize) -> Result<Vec<CorpusHit>, CapabilityError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            CapabilityError::Fatal(format!("cannot read corpus {}: {e}", self.dir.display()))
        })?;

        let mut hits = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CapabilityError::Transient(e.to_string()))?
        {
            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if !supported {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                debug!(path = %path.display(), "Skipping unreadable corpus file");
                continue;
            };
            let score = score(&content, terms);
            if score > 0 {
                hits.push(CorpusHit {
                    source: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    score,
                    preview: preview(&content),
                });
            }
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.source.cmp(&b.source)));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Lowercased search terms: words of the topic plus whole keywords.
pub fn search_terms(topic: &str, keywords: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = topic
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 2)
        .collect();
    terms.extend(
        keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty()),
    );
    terms.sort();
    terms.dedup();
    terms
}

/// Total number of term occurrences, case-insensitive.
pub fn score(content: &str, terms: &[String]) -> usize {
    let haystack = content.to_lowercase();
    terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum()
}

#[async_trait]
impl Capability for LocalCorpusTool {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Retrieval
    }

    fn description(&self) -> &str {
        "Search local Markdown and text notes by keyword. Returns previews of the best matches."
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, CapabilityError> {
        let topic = arguments["topic"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing 'topic' argument".into()))?;
        let keywords = string_list(&arguments["keywords"]);
        let limit = arguments["max_results"].as_u64().unwrap_or(5).clamp(1, 50) as usize;

        let terms = search_terms(topic, &keywords);
        if terms.is_empty() {
            return Err(CapabilityError::InvalidArguments(
                "topic and keywords contain no searchable terms".into(),
            ));
        }

        let hits = self.search(&terms, limit).await?;
        if hits.is_empty() {
            return Err(CapabilityError::Fatal(format!(
                "no documents in {} matched",
                self.dir.display()
            )));
        }

        let mut text = String::new();
        for hit in &hits {
            text.push_str(&format!("Source: {}\nContent: {}\n\n", hit.source, hit.preview));
        }
        let data = serde_json::to_value(&hits)
            .map_err(|e| CapabilityError::Fatal(format!("cannot encode hits: {e}")))?;
        Ok(ToolOutput::text(text).with_topic(TOPIC).with_data(data))
    }
}
