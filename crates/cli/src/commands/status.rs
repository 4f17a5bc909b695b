//! `scribeloop status` — Show the effective configuration.

use scribeloop_config::AppConfig;
use std::path::Path;

pub async fn run(config: &AppConfig, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let engine = &config.engine;
    let caps = &config.capabilities;

    println!("📝 Scribeloop Status");
    println!("===================");
    println!("  Config dir:      {}", AppConfig::config_dir().display());
    println!("  Max iterations:  {}", engine.max_iterations);
    println!("  Call timeout:    {}s", engine.per_call_timeout_secs);
    println!("  Attempts/call:   {}", engine.max_attempts_per_call);
    println!("  Context budget:  {} ({:?})", engine.context_budget, engine.cost_unit);
    match engine.deadline_secs {
        Some(secs) => println!("  Deadline:        {secs}s"),
        None => println!("  Deadline:        none"),
    }
    println!(
        "  Retry backoff:   {}ms → {}ms{}",
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        if config.retry.jitter { " (jitter)" } else { "" }
    );
    println!("  Required:        {}", caps.required.join(", "));
    println!("  Optional:        {}", caps.optional.join(", "));
    println!(
        "  PubMed:          {}",
        if caps.pubmed.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  PMC full text:   {}",
        if caps.pmc.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  PubMed API key:  {}",
        if caps.pubmed.api_key.is_some() { "set" } else { "not set" }
    );
    match &caps.corpus.dir {
        Some(dir) => println!("  Local corpus:    {}", dir.display()),
        None => println!("  Local corpus:    not configured"),
    }
    println!("  Plugins:         {}", caps.plugins.len());
    println!("  Log level:       {}", config.logging.level);

    let config_path = super::config_path(path);
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — `scribeloop config default > {}`", config_path.display());
    }

    Ok(())
}
