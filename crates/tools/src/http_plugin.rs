//! HTTP generation plugin — image synthesis, translation or anything else
//! reachable as a JSON endpoint.
//!
//! The tool arguments are POSTed as-is. The endpoint answers with either
//! `{"text": "..."}` or `{"url": "...", "media_type": "..."}`.

use async_trait::async_trait;
use scribeloop_core::error::CapabilityError;
use scribeloop_core::tool::{Capability, CapabilityKind, ToolOutput};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::classify_status;

pub struct HttpPluginTool {
    kind: CapabilityKind,
    description: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct PluginResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl HttpPluginTool {
    pub fn new(kind: CapabilityKind, endpoint: impl Into<String>) -> Self {
        let description = match &kind {
            CapabilityKind::ImageGeneration => "Generate an illustration for the article".to_string(),
            CapabilityKind::Translation => "Translate article text into other languages".to_string(),
            other => format!("HTTP plugin ({other})"),
        };
        Self {
            kind,
            description,
            endpoint: endpoint.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.is_empty() {
            self.description = description;
        }
        self
    }

    fn default_media_type(&self) -> &'static str {
        match self.kind {
            CapabilityKind::ImageGeneration => "image/png",
            _ => "application/octet-stream",
        }
    }

    fn build_output(&self, body: PluginResponse) -> Result<ToolOutput, CapabilityError> {
        let output = match (body.text, body.url) {
            (Some(text), _) => ToolOutput::text(text),
            (None, Some(url)) => ToolOutput::reference(
                url,
                body.media_type
                    .unwrap_or_else(|| self.default_media_type().to_string()),
            ),
            (None, None) => {
                return Err(CapabilityError::Fatal(
                    "plugin response has neither 'text' nor 'url'".into(),
                ));
            }
        };
        let output = match body.topic {
            Some(topic) => output.with_topic(topic),
            None => output,
        };
        Ok(match body.data {
            Some(data) => output.with_data(data),
            None => output,
        })
    }
}

#[async_trait]
impl Capability for HttpPluginTool {
    fn kind(&self) -> CapabilityKind {
        self.kind.clone()
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, CapabilityError> {
        if !arguments.is_object() {
            return Err(CapabilityError::InvalidArguments(
                "plugin arguments must be a JSON object".into(),
            ));
        }

        debug!(endpoint = %self.endpoint, kind = %self.kind, "Calling plugin");

        let mut request = self.client.post(&self.endpoint).json(&arguments);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            CapabilityError::Transient(format!("plugin request failed: {e}"))
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, endpoint = %self.endpoint, "Plugin returned error");
            return Err(classify_status(status, &body));
        }

        let body: PluginResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Fatal(format!("malformed plugin response: {e}")))?;
        self.build_output(body)
    }
}
