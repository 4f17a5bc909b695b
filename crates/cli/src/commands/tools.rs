//! `scribeloop tools` — List the capabilities the engine can call.

use scribeloop_config::AppConfig;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = scribeloop_tools::default_registry(config)?;

    println!("Registered capabilities");
    println!("=======================");
    if registry.is_empty() {
        println!("  (none — enable pubmed or pmc, set capabilities.corpus.dir or add plugins)");
        return Ok(());
    }

    for (name, kind, description) in registry.descriptions() {
        let role = if config.capabilities.required.contains(&name) {
            "required"
        } else if config.capabilities.optional.contains(&name) {
            "optional"
        } else {
            "on demand"
        };
        println!("  {name:<16} {:<18} {role:<10} {description}", kind.label());
    }

    let missing: Vec<_> = config
        .capabilities
        .required
        .iter()
        .chain(config.capabilities.optional.iter())
        .filter(|name| !registry.contains(name))
        .collect();
    if !missing.is_empty() {
        println!();
        for name in missing {
            println!("  ⚠️  '{name}' is configured but not registered");
        }
    }

    Ok(())
}
