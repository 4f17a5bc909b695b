//! Capability trait and tool registry.
//!
//! Capabilities are what let a writing task reach outside the engine:
//! search literature sources, generate images, translate text. Every one of
//! them sits behind the same [`Capability`] trait and is looked up by name in
//! the [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{CapabilityError, ToolError};

/// The broad class a capability belongs to.
///
/// The engine uses the kind only to shape call arguments and to classify the
/// resulting context entries; dispatch itself is kind-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Retrieval,
    ImageGeneration,
    Translation,
    Custom(String),
}

impl CapabilityKind {
    /// Whether outputs of this kind count as retrieval evidence.
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval)
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Retrieval => "retrieval",
            Self::ImageGeneration => "image_generation",
            Self::Translation => "translation",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A request to execute a named capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID, shared by every attempt of this call
    pub id: String,

    /// Name the capability was registered under
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// What a capability produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    /// A reference to binary content held elsewhere (an image URL, a file path).
    Reference { uri: String, media_type: String },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn reference(uri: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::Reference {
            uri: uri.into(),
            media_type: media_type.into(),
        }
    }

    /// Text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Reference { .. } => None,
        }
    }

    /// Size in bytes of the inline part of the payload.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text { text } => text.len(),
            Self::Reference { uri, .. } => uri.len(),
        }
    }
}

/// The successful result of a capability execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub payload: Payload,

    /// Topical key used to group evidence into article sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Optional structured data (raw API response, scores, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::text(text),
            topic: None,
            data: None,
        }
    }

    pub fn reference(uri: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            payload: Payload::reference(uri, media_type),
            topic: None,
            data: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Capability trait.
///
/// Implementations must be reentrant: one instance serves concurrent calls
/// from independent tasks and must not keep per-call mutable state.
#[async_trait]
pub trait Capability: Send + Sync {
    /// What class of capability this is.
    fn kind(&self) -> CapabilityKind;

    /// A short human-readable description.
    fn description(&self) -> &str;

    /// Execute the capability with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, CapabilityError>;

    /// Whether a failure may succeed if the call is repeated.
    fn is_retriable(&self, error: &CapabilityError) -> bool {
        matches!(error, CapabilityError::Transient(_))
    }
}

/// A registry of named capabilities.
///
/// Populated once at startup, then shared read-only (`Arc<ToolRegistry>`)
/// between every running task. It holds no retry logic.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Capability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Bind a unique name to a capability.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> std::result::Result<(), ToolError> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        debug!(tool = %name, kind = %capability.kind(), "Registered capability");
        self.tools.insert(name, capability);
        Ok(())
    }

    /// Get a capability by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// The kind of a registered capability.
    pub fn kind(&self, name: &str) -> Option<CapabilityKind> {
        self.tools.get(name).map(|c| c.kind())
    }

    /// Kinds of every registered capability, keyed by name.
    pub fn kinds(&self) -> HashMap<String, CapabilityKind> {
        self.tools
            .iter()
            .map(|(name, c)| (name.clone(), c.kind()))
            .collect()
    }

    /// Invoke a capability under a timeout.
    ///
    /// Unknown names fail before anything executes. Capability failures are
    /// wrapped as `Retriable` or `Execution` according to the capability's
    /// own `is_retriable` classification.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let capability = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        match tokio::time::timeout(timeout, capability.execute(arguments)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if capability.is_retriable(&e) => Err(ToolError::Retriable {
                tool: name.to_string(),
                source: e,
            }),
            Ok(Err(e)) => Err(ToolError::Execution {
                tool: name.to_string(),
                source: e,
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// `(name, kind, description)` for every tool, sorted by name.
    pub fn descriptions(&self) -> Vec<(String, CapabilityKind, String)> {
        let mut out: Vec<_> = self
            .tools
            .iter()
            .map(|(name, c)| (name.clone(), c.kind(), c.description().to_string()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
