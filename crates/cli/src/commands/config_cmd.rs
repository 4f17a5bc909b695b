//! `scribeloop config` — Configuration management commands.

use scribeloop_config::AppConfig;
use std::path::Path;

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", super::config_path(path).display());
    Ok(())
}

pub async fn validate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    if let Err(e) = config.validate() {
        println!("   ❌ Config error: {e}");
        return Err(e.into());
    }
    println!("   ✅ Config parsed successfully");

    let registry = scribeloop_tools::default_registry(config)?;
    let mut warnings = Vec::new();
    for name in config
        .capabilities
        .required
        .iter()
        .chain(config.capabilities.optional.iter())
    {
        if !registry.contains(name) {
            warnings.push(format!("Capability '{name}' is listed but not enabled"));
        }
    }
    if config.capabilities.pubmed.enabled && config.capabilities.pubmed.email.is_none() {
        warnings.push("No contact email set for PubMed (capabilities.pubmed.email)".into());
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Max iterations: {}", config.engine.max_iterations);
    println!("   Context budget: {}", config.engine.context_budget);
    println!("   Capabilities:   {}", registry.names().join(", "));

    Ok(())
}

/// Copy of `config` with secrets masked, safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    mask(&mut config.capabilities.pubmed.api_key);
    for plugin in &mut config.capabilities.plugins {
        mask(&mut plugin.api_key);
    }
    config
}
