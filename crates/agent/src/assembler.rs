//! Result assembly — turns the final context snapshot into an [`Article`].
//!
//! Retrieval entries become body sections grouped by topical key, in order of
//! first appearance. Plugin outputs become artifacts. Plan notes are dropped.

use chrono::Utc;
use std::collections::HashMap;

use scribeloop_core::article::{Article, Artifact, ArtifactKind, Section};
use scribeloop_core::error::EngineError;
use scribeloop_core::task::Task;
use scribeloop_core::tool::{CapabilityKind, Payload, ToolOutput};

use crate::context::{ContextEntry, ContextSnapshot, EntryKind};

/// Assigns the topical key of a new context entry.
pub trait TopicKey: Send + Sync {
    fn key(&self, tool: &str, output: &ToolOutput) -> String;
}

/// The capability's own topic, falling back to the tool name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTopicKey;

impl TopicKey for DefaultTopicKey {
    fn key(&self, tool: &str, output: &ToolOutput) -> String {
        output
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(tool)
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAssembler;

impl ResultAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Compile the article. Fails when there is no retrieval evidence.
    pub fn assemble(&self, task: &Task, snapshot: &ContextSnapshot) -> Result<Article, EngineError> {
        if !snapshot.has_retrieval() {
            return Err(EngineError::InsufficientContext);
        }

        let mut sections: Vec<Section> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut artifacts = Vec::new();

        for entry in snapshot.iter() {
            match entry.kind {
                EntryKind::Retrieval => {
                    let pos = *index.entry(entry.topic.as_str()).or_insert_with(|| {
                        sections.push(Section {
                            heading: entry.topic.clone(),
                            body: String::new(),
                            provenance: Vec::new(),
                        });
                        sections.len() - 1
                    });
                    let section = &mut sections[pos];
                    if !section.body.is_empty() {
                        section.body.push_str("\n\n");
                    }
                    section.body.push_str(&render_payload(&entry.payload));
                    section.provenance.push(entry.seq);
                }
                EntryKind::PluginOutput => artifacts.push(to_artifact(entry)),
                EntryKind::PlanNote => {}
            }
        }

        Ok(Article {
            task_id: task.id,
            title: task.topic.clone(),
            sections,
            artifacts,
            created_at: Utc::now(),
        })
    }
}

fn render_payload(payload: &Payload) -> String {
    match payload {
        Payload::Text { text } => text.trim().to_string(),
        Payload::Reference { uri, media_type } => format!("[{media_type}]({uri})"),
    }
}

fn to_artifact(entry: &ContextEntry) -> Artifact {
    let kind = match entry.capability {
        Some(CapabilityKind::ImageGeneration) => ArtifactKind::Image,
        Some(CapabilityKind::Translation) => ArtifactKind::Translation,
        _ => ArtifactKind::Other,
    };
    Artifact {
        kind,
        source: entry.origin.clone(),
        payload: entry.payload.clone(),
        language: entry.language.clone(),
        seq: entry.seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextBuffer, NewEntry};
    use scribeloop_core::task::{CostUnit, TaskConfig};

    fn task() -> Task {
        Task::new("CRISPR in agriculture", TaskConfig::default()).unwrap()
    }

    #[test]
    fn no_retrieval_is_insufficient() {
        let mut buf = ContextBuffer::new(1000, CostUnit::Tokens);
        buf.append(NewEntry::plan_note("tried things")).unwrap();
        buf.append(NewEntry::plugin_output(
            "illustrate",
            CapabilityKind::ImageGeneration,
            "img",
            Payload::reference("https://img.example/a.png", "image/png"),
        ))
        .unwrap();

        assert_eq!(
            ResultAssembler::new().assemble(&task(), &buf.snapshot()),
            Err(EngineError::InsufficientContext)
        );
    }

    #[test]
    fn sections_group_by_topic_in_first_appearance_order() {
        let mut buf = ContextBuffer::new(1000, CostUnit::Tokens);
        buf.append(NewEntry::retrieval("pubmed", "Research", Payload::text("A"))).unwrap(); // 0
        buf.append(NewEntry::retrieval("notes", "Notes", Payload::text("B"))).unwrap(); // 1
        buf.append(NewEntry::plan_note("skip me")).unwrap(); // 2
        buf.append(NewEntry::retrieval("pubmed", "Research", Payload::text("C"))).unwrap(); // 3

        let t = task();
        let article = ResultAssembler::new().assemble(&t, &buf.snapshot()).unwrap();
        assert_eq!(article.title, "CRISPR in agriculture");
        assert_eq!(article.task_id, t.id);
        assert_eq!(article.sections.len(), 2);
        assert_eq!(article.sections[0].heading, "Research");
        assert_eq!(article.sections[0].body, "A\n\nC");
        assert_eq!(article.sections[0].provenance, vec![0, 3]);
        assert_eq!(article.sections[1].provenance, vec![1]);
        assert!(!article.to_markdown().contains("skip me"));
    }

    #[test]
    fn plugin_outputs_become_artifacts() {
        let mut buf = ContextBuffer::new(1000, CostUnit::Tokens);
        buf.append(NewEntry::retrieval("pubmed", "Research", Payload::text("A"))).unwrap();
        buf.append(NewEntry::plugin_output(
            "translate",
            CapabilityKind::Translation,
            "fr",
            Payload::text("Le texte"),
        ))
        .unwrap();
        buf.append(NewEntry::plugin_output(
            "illustrate",
            CapabilityKind::ImageGeneration,
            "illustrate",
            Payload::reference("https://img.example/a.png", "image/png"),
        ))
        .unwrap();

        let article = ResultAssembler::new().assemble(&task(), &buf.snapshot()).unwrap();
        assert_eq!(article.sections.len(), 1);
        assert_eq!(article.artifacts.len(), 2);
        assert_eq!(article.artifacts[0].kind, ArtifactKind::Translation);
        assert_eq!(article.artifacts[1].kind, ArtifactKind::Image);
        assert_eq!(article.artifacts[1].seq, 2);
        assert!(!article.sections[0].body.contains("Le texte"));
    }

    #[test]
    fn translation_artifacts_keep_their_language() {
        let mut buf = ContextBuffer::new(1000, CostUnit::Tokens);
        buf.append(NewEntry::retrieval("pubmed", "Research", Payload::text("A"))).unwrap();
        for (lang, text) in [("fr", "Le texte"), ("ja", "テキスト")] {
            buf.append(
                NewEntry::plugin_output(
                    "translate",
                    CapabilityKind::Translation,
                    "translate",
                    Payload::text(text),
                )
                .with_language(Some(lang.into())),
            )
            .unwrap();
        }

        let article = ResultAssembler::new().assemble(&task(), &buf.snapshot()).unwrap();
        let translations: Vec<_> = article
            .translations()
            .map(|(lang, a)| (lang, a.payload.as_text().unwrap_or_default()))
            .collect();
        assert_eq!(translations, vec![("fr", "Le texte"), ("ja", "テキスト")]);
    }

    #[test]
    fn topic_key_falls_back_to_tool_name() {
        let key = DefaultTopicKey;
        assert_eq!(key.key("pubmed", &ToolOutput::text("x")), "pubmed");
        assert_eq!(
            key.key("pubmed", &ToolOutput::text("x").with_topic("Research")),
            "Research"
        );
        assert_eq!(key.key("pubmed", &ToolOutput::text("x").with_topic("  ")), "pubmed");
    }
}
