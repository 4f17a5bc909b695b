//! Built-in capabilities for Scribeloop.
//!
//! Capabilities let a writing task gather evidence and produce artifacts:
//! search PubMed and PubMed Central, search a local corpus of notes, and call
//! HTTP plugins for image generation, translation or custom processing.

pub mod eutils;
pub mod http_plugin;
pub mod local_corpus;
pub mod pmc;
pub mod pubmed;
mod xml;

use scribeloop_config::AppConfig;
use scribeloop_core::error::{CapabilityError, ToolError};
use scribeloop_core::tool::ToolRegistry;
use std::sync::Arc;

pub use http_plugin::HttpPluginTool;
pub use eutils::EUtils;
pub use local_corpus::LocalCorpusTool;
pub use pmc::PmcTool;
pub use pubmed::PubMedTool;

/// Registry name of the PubMed capability.
pub const PUBMED: &str = "pubmed";
/// Registry name of the PubMed Central full-text capability.
pub const PMC: &str = "pmc";
/// Registry name of the local corpus capability.
pub const LOCAL_CORPUS: &str = "local_corpus";

/// Create a registry with every capability enabled in `config`.
///
/// - `pubmed` unless `capabilities.pubmed.enabled = false`
/// - `pmc` unless `capabilities.pmc.enabled = false`; it shares the PubMed
///   endpoint and credentials
/// - `local_corpus` when `capabilities.corpus.dir` is set
/// - one HTTP plugin per `[[capabilities.plugins]]` entry
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let caps = &config.capabilities;
    let mut registry = ToolRegistry::new();

    let eutils = EUtils::new(caps.pubmed.base_url.clone())
        .with_api_key(caps.pubmed.api_key.clone())
        .with_email(caps.pubmed.email.clone());
    if caps.pubmed.enabled {
        registry.register(PUBMED, Arc::new(PubMedTool::new(eutils.clone())))?;
    }
    if caps.pmc.enabled {
        registry.register(PMC, Arc::new(PmcTool::new(eutils)))?;
    }

    if let Some(dir) = &caps.corpus.dir {
        registry.register(LOCAL_CORPUS, Arc::new(LocalCorpusTool::new(dir.clone())))?;
    }

    for plugin in &caps.plugins {
        let tool = HttpPluginTool::new(plugin.capability_kind(), plugin.endpoint.clone())
            .with_api_key(plugin.api_key.clone())
            .with_description(plugin.description.clone());
        registry.register(plugin.name.clone(), Arc::new(tool))?;
    }

    tracing::debug!(tools = registry.len(), "Built default registry");
    Ok(registry)
}

// ── Shared helpers ──

/// Characters of document text shown in evidence previews.
pub(crate) const PREVIEW_CHARS: usize = 400;

/// 408, 429 and 5xx are worth retrying; every other status is final.
pub(crate) fn classify_status(status: u16, body: &str) -> CapabilityError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body, 200))
    };
    if status == 408 || status == 429 || status >= 500 {
        CapabilityError::Transient(detail)
    } else {
        CapabilityError::Fatal(detail)
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First [`PREVIEW_CHARS`] characters of `content`, with `...` when cut.
pub(crate) fn preview(content: &str) -> String {
    let trimmed = content.trim();
    let head = truncate(trimmed, PREVIEW_CHARS);
    if head.len() < trimmed.len() {
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// String elements of a JSON array argument; anything else is empty.
pub(crate) fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribeloop_config::{PluginConfig, PluginKind};
    use scribeloop_core::tool::CapabilityKind;

    #[test]
    fn default_config_registers_literature_search() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.names(), vec![PMC, PUBMED]);
        assert_eq!(registry.kind(PUBMED), Some(CapabilityKind::Retrieval));
        assert_eq!(registry.kind(PMC), Some(CapabilityKind::Retrieval));
    }

    #[test]
    fn corpus_and_plugins_are_registered() {
        let mut config = AppConfig::default();
        config.capabilities.corpus.dir = Some("/tmp/notes".into());
        config.capabilities.plugins.push(PluginConfig {
            name: "illustrator".into(),
            kind: PluginKind::ImageGeneration,
            endpoint: "https://images.example/v1".into(),
            api_key: None,
            description: String::new(),
        });

        let registry = default_registry(&config).unwrap();
        assert_eq!(registry.names(), vec!["illustrator", LOCAL_CORPUS, PMC, PUBMED]);
        assert_eq!(
            registry.kind("illustrator"),
            Some(CapabilityKind::ImageGeneration)
        );
    }

    #[test]
    fn disabled_capabilities_are_skipped() {
        let mut config = AppConfig::default();
        config.capabilities.pubmed.enabled = false;
        assert_eq!(default_registry(&config).unwrap().names(), vec![PMC]);

        config.capabilities.pmc.enabled = false;
        assert!(default_registry(&config).unwrap().is_empty());
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [408, 429, 500, 503] {
            assert!(matches!(
                classify_status(status, ""),
                CapabilityError::Transient(_)
            ));
        }
        for status in [400, 401, 404] {
            assert!(matches!(
                classify_status(status, "nope"),
                CapabilityError::Fatal(_)
            ));
        }
        let CapabilityError::Fatal(detail) = classify_status(400, &"e".repeat(500)) else {
            panic!("expected fatal");
        };
        assert_eq!(detail.len(), "HTTP 400: ".len() + 200);
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("  short  "), "short");
        let cut = preview(&"é".repeat(PREVIEW_CHARS + 1));
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview(&"é".repeat(PREVIEW_CHARS)).chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn plugin_shadowing_builtin_is_rejected() {
        let mut config = AppConfig::default();
        config.capabilities.plugins.push(PluginConfig {
            name: PUBMED.into(),
            kind: PluginKind::Custom,
            endpoint: "https://x.example".into(),
            api_key: None,
            description: String::new(),
        });
        assert!(matches!(
            default_registry(&config),
            Err(ToolError::DuplicateTool(name)) if name == PUBMED
        ));
    }
}
