use anyhow::Result;
use std::path::Path;
use tracing::info;

use annot::config::AnnotConfig;
use annot::config_discovery::load_config_with_discovery;
use annot::logging;

use crate::cli::{CacheArgs, CommonConfigArgs, ConfigCommands};

pub fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(path.as_deref()),
        ConfigCommands::Generate => generate(),
        ConfigCommands::Show { common, cache } => show(&common, &cache),
    }
}

fn validate(path: Option<&str>) -> Result<()> {
    logging::init("info");

    let Some((path, config)) = load_config_with_discovery(path.map(Path::new))? else {
        anyhow::bail!("No configuration file found");
    };
    info!("Validating config file: {}", path.display());
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path.display());
    println!("\nSummary:");
    println!(
        "  - Store: {}",
        config.store.url.as_deref().unwrap_or("(default)")
    );
    println!("  - Quests: {}", config.quests.dir);
    println!(
        "  - Source: {}",
        config.source.url.as_deref().unwrap_or("(none)")
    );
    println!(
        "  - Cache: read={} write={} only={}",
        config.cache.read, config.cache.write, config.cache.only
    );

    Ok(())
}

fn generate() -> Result<()> {
    println!("{}", AnnotConfig::example()?);
    Ok(())
}

fn show(common: &CommonConfigArgs, cache: &CacheArgs) -> Result<()> {
    let merged = super::load(common, cache)?;

    println!("Effective Configuration:\n");
    println!("{}", toml::to_string_pretty(&merged)?);

    Ok(())
}
