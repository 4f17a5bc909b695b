//! Configuration loading, validation, and management for Scribeloop.
//!
//! Loads configuration from `~/.scribeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup and converts them
//! into the per-task [`TaskConfig`] and [`BriefLimits`] the engine consumes.

use scribeloop_core::{BriefLimits, CapabilityKind, CostUnit, RetryPolicy, TaskConfig, WritingBrief};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.scribeloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop limits and context budget
    #[serde(default)]
    pub engine: EngineConfig,

    /// Backoff between retriable failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Accepted brief values and their defaults
    #[serde(default)]
    pub brief: BriefConfig,

    /// Which tools exist and which a task must call
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_call: u32,
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    #[serde(default)]
    pub cost_unit: CostUnit,
    /// Overall deadline per task (unset = none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_per_call_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_context_budget() -> usize {
    8192
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            max_attempts_per_call: default_max_attempts(),
            context_budget: default_context_budget(),
            cost_unit: CostUnit::default(),
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

/// Brief limits. Defaults match [`BriefLimits::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefConfig {
    pub supported_styles: Vec<String>,
    pub supported_languages: Vec<String>,
    pub default_style: String,
    pub default_language: String,
    pub max_keywords: usize,
    pub max_focus_areas: usize,
    pub default_max_sources: u32,
    pub max_sources_limit: u32,
}

impl Default for BriefConfig {
    fn default() -> Self {
        let limits = BriefLimits::default();
        Self {
            supported_styles: limits.supported_styles,
            supported_languages: limits.supported_languages,
            default_style: limits.default_style,
            default_language: limits.default_language,
            max_keywords: limits.max_keywords,
            max_focus_areas: limits.max_focus_areas,
            default_max_sources: limits.default_max_sources,
            max_sources_limit: limits.max_sources_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Tools every task must call successfully, in order
    #[serde(default = "default_required")]
    pub required: Vec<String>,

    /// Tools tried once each after the required ones
    #[serde(default = "default_optional")]
    pub optional: Vec<String>,

    #[serde(default)]
    pub pubmed: PubMedConfig,

    /// PubMed Central full text; shares the `pubmed` endpoint and credentials
    #[serde(default)]
    pub pmc: PmcConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    /// HTTP generation plugins (image, translation, custom)
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

fn default_required() -> Vec<String> {
    vec!["pubmed".into()]
}

fn default_optional() -> Vec<String> {
    vec!["pmc".into()]
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            required: default_required(),
            optional: default_optional(),
            pubmed: PubMedConfig::default(),
            pmc: PmcConfig::default(),
            corpus: CorpusConfig::default(),
            plugins: vec![],
        }
    }
}

impl CapabilitiesConfig {
    /// First configured plugin of the given kind.
    pub fn plugin_of_kind(&self, kind: &PluginKind) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| &p.kind == kind)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PubMedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_pubmed_url")]
    pub base_url: String,

    /// NCBI API key (raises the rate limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Contact email sent with every request, as NCBI asks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

fn default_pubmed_url() -> String {
    "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into()
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_pubmed_url(),
            api_key: None,
            email: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PmcConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl std::fmt::Debug for PubMedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubMedConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("email", &self.email)
            .finish()
    }
}

/// Local Markdown/text corpus used as a retrieval source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Directory to search; the tool is only registered when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    ImageGeneration,
    Translation,
    Custom,
}

/// One HTTP generation plugin.
#[derive(Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Registry name of the tool
    pub name: String,
    pub kind: PluginKind,
    /// Endpoint that receives the tool arguments as a JSON POST
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl PluginConfig {
    pub fn capability_kind(&self) -> CapabilityKind {
        match self.kind {
            PluginKind::ImageGeneration => CapabilityKind::ImageGeneration,
            PluginKind::Translation => CapabilityKind::Translation,
            PluginKind::Custom => CapabilityKind::Custom(self.name.clone()),
        }
    }
}

impl std::fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.scribeloop/config.toml).
    ///
    /// Environment overrides:
    /// - `SCRIBELOOP_PUBMED_API_KEY`, then `NCBI_API_KEY`
    /// - `SCRIBELOOP_CORPUS_DIR`
    /// - `SCRIBELOOP_LOG`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file yields the defaults; callers report that once their
    /// logging is up.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.capabilities.pubmed.api_key.is_none() {
            self.capabilities.pubmed.api_key = std::env::var("SCRIBELOOP_PUBMED_API_KEY")
                .ok()
                .or_else(|| std::env::var("NCBI_API_KEY").ok());
        }

        if let Ok(dir) = std::env::var("SCRIBELOOP_CORPUS_DIR") {
            self.capabilities.corpus.dir = Some(PathBuf::from(dir));
        }

        if let Ok(level) = std::env::var("SCRIBELOOP_LOG") {
            self.logging.level = level;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".scribeloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be > 0".into(),
            ));
        }
        if engine.max_attempts_per_call == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_attempts_per_call must be > 0".into(),
            ));
        }
        if engine.per_call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.per_call_timeout_secs must be > 0".into(),
            ));
        }
        if engine.context_budget == 0 {
            return Err(ConfigError::ValidationError(
                "engine.context_budget must be > 0".into(),
            ));
        }
        if engine.deadline_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "engine.deadline_secs must be > 0 when set".into(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }

        let brief = &self.brief;
        if !brief.supported_styles.contains(&brief.default_style) {
            return Err(ConfigError::ValidationError(format!(
                "brief.default_style '{}' is not in supported_styles",
                brief.default_style
            )));
        }
        if !brief.supported_languages.contains(&brief.default_language) {
            return Err(ConfigError::ValidationError(format!(
                "brief.default_language '{}' is not in supported_languages",
                brief.default_language
            )));
        }
        if brief.default_max_sources == 0 || brief.default_max_sources > brief.max_sources_limit {
            return Err(ConfigError::ValidationError(
                "brief.default_max_sources must be between 1 and max_sources_limit".into(),
            ));
        }

        let mut names = vec!["pubmed", "pmc", "local_corpus"];
        for plugin in &self.capabilities.plugins {
            if plugin.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "capabilities.plugins entries need a name".into(),
                ));
            }
            if names.contains(&plugin.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "capability name '{}' is used more than once",
                    plugin.name
                )));
            }
            if !plugin.endpoint.starts_with("http://") && !plugin.endpoint.starts_with("https://")
            {
                return Err(ConfigError::ValidationError(format!(
                    "plugin '{}' endpoint must be an http(s) URL",
                    plugin.name
                )));
            }
            names.push(&plugin.name);
        }

        let caps = &self.capabilities;
        let disabled = [("pubmed", caps.pubmed.enabled), ("pmc", caps.pmc.enabled)];
        for name in caps.required.iter().chain(caps.optional.iter()) {
            if disabled.iter().any(|(n, on)| !on && n == name) {
                return Err(ConfigError::ValidationError(format!(
                    "capability '{name}' is disabled but listed in required/optional"
                )));
            }
            let count = caps
                .required
                .iter()
                .chain(caps.optional.iter())
                .filter(|n| *n == name)
                .count();
            if count > 1 {
                return Err(ConfigError::ValidationError(format!(
                    "capability '{name}' is listed more than once in required/optional"
                )));
            }
        }

        Ok(())
    }

    pub fn brief_limits(&self) -> BriefLimits {
        BriefLimits {
            supported_styles: self.brief.supported_styles.clone(),
            supported_languages: self.brief.supported_languages.clone(),
            default_style: self.brief.default_style.clone(),
            default_language: self.brief.default_language.clone(),
            max_keywords: self.brief.max_keywords,
            max_focus_areas: self.brief.max_focus_areas,
            default_max_sources: self.brief.default_max_sources,
            max_sources_limit: self.brief.max_sources_limit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    /// Build the run limits for one task.
    ///
    /// Requested translations make the translation plugin required; requested
    /// images add the image plugin as optional.
    pub fn task_config(&self, brief: &WritingBrief) -> TaskConfig {
        let mut required = self.capabilities.required.clone();
        let mut optional = self.capabilities.optional.clone();

        if !brief.translate_to.is_empty() {
            match self.capabilities.plugin_of_kind(&PluginKind::Translation) {
                Some(plugin) => {
                    optional.retain(|n| n != &plugin.name);
                    if !required.contains(&plugin.name) {
                        required.push(plugin.name.clone());
                    }
                }
                None => tracing::warn!("Translation requested but no translation plugin configured"),
            }
        }

        if brief.generate_images {
            match self.capabilities.plugin_of_kind(&PluginKind::ImageGeneration) {
                Some(plugin) => {
                    if !required.contains(&plugin.name) && !optional.contains(&plugin.name) {
                        optional.push(plugin.name.clone());
                    }
                }
                None => tracing::warn!("Images requested but no image plugin configured"),
            }
        }

        TaskConfig {
            max_iterations: self.engine.max_iterations,
            per_call_timeout: Duration::from_secs(self.engine.per_call_timeout_secs),
            max_attempts_per_call: self.engine.max_attempts_per_call,
            context_budget: self.engine.context_budget,
            cost_unit: self.engine.cost_unit,
            required_capabilities: required,
            optional_capabilities: optional,
            retry: self.retry_policy(),
            deadline: self.engine.deadline_secs.map(Duration::from_secs),
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PLUGINS: &str = r#"
[[capabilities.plugins]]
name = "translator"
kind = "translation"
endpoint = "https://translate.example/v1"
api_key = "sk-secret"

[[capabilities.plugins]]
name = "illustrator"
kind = "image_generation"
endpoint = "https://images.example/v1"
"#;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_iterations, 8);
        assert_eq!(config.capabilities.required, vec!["pubmed".to_string()]);
        assert!(config.capabilities.pubmed.enabled);
        assert!(config.capabilities.pmc.enabled);
        assert_eq!(config.capabilities.optional, vec!["pmc".to_string()]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.context_budget, 8192);
        assert_eq!(parsed.brief.max_keywords, 10);
        assert_eq!(parsed.retry.base_delay_ms, 250);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.engine.max_attempts_per_call, 3);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[engine]\nmax_iterations = 4\ncost_unit = \"bytes\"\n{PLUGINS}"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.engine.max_iterations, 4);
        assert_eq!(config.engine.cost_unit, CostUnit::Bytes);
        assert_eq!(config.capabilities.plugins.len(), 2);
    }

    #[test]
    fn parse_error_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nmax_iterations = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert_eq!(path, file.path()),
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = AppConfig::from_toml_str("[engine]\nmax_iterations = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn inverted_retry_delays_rejected() {
        let config = AppConfig {
            retry: RetryConfig {
                base_delay_ms: 1_000,
                max_delay_ms: 10,
                jitter: false,
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_default_style_rejected() {
        let mut config = AppConfig::default();
        config.brief.default_style = "haiku".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_plugin_names_rejected() {
        let toml_str = r#"
[[capabilities.plugins]]
name = "pubmed"
kind = "custom"
endpoint = "https://x.example"
"#;
        assert!(AppConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn disabled_builtin_cannot_be_listed() {
        let err = AppConfig::from_toml_str("[capabilities.pmc]\nenabled = false").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("'pmc'")));

        let config =
            AppConfig::from_toml_str("[capabilities]\noptional = []\n[capabilities.pmc]\nenabled = false")
                .unwrap();
        assert!(!config.capabilities.pmc.enabled);
    }

    #[test]
    fn non_http_endpoint_rejected() {
        let toml_str = r#"
[[capabilities.plugins]]
name = "x"
kind = "custom"
endpoint = "ftp://x.example"
"#;
        assert!(AppConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn task_config_adds_requested_plugins() {
        let config = AppConfig::from_toml_str(PLUGINS).unwrap();
        let brief = WritingBrief {
            translate_to: vec!["fr".into()],
            generate_images: true,
            ..WritingBrief::default()
        };
        let task_config = config.task_config(&brief);
        assert_eq!(
            task_config.required_capabilities,
            vec!["pubmed".to_string(), "translator".to_string()]
        );
        assert_eq!(
            task_config.optional_capabilities,
            vec!["pmc".to_string(), "illustrator".to_string()]
        );
        assert!(task_config.validate().is_ok());
    }

    #[test]
    fn task_config_without_requests_keeps_defaults() {
        let config = AppConfig::from_toml_str(PLUGINS).unwrap();
        let task_config = config.task_config(&WritingBrief::default());
        assert_eq!(task_config.required_capabilities, vec!["pubmed".to_string()]);
        assert_eq!(task_config.optional_capabilities, vec!["pmc".to_string()]);
        assert_eq!(task_config.per_call_timeout, Duration::from_secs(60));
        assert_eq!(task_config.deadline, None);
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::from_toml_str(PLUGINS).unwrap();
        config.capabilities.pubmed.api_key = Some("ncbi-key".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("ncbi-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn brief_limits_follow_config() {
        let mut config = AppConfig::default();
        config.brief.max_keywords = 3;
        let limits = config.brief_limits();
        assert_eq!(limits.max_keywords, 3);
        assert_eq!(limits.default_language, "en");
    }
}
