use anyhow::Result;

use annot::QuestRegistry;

use crate::cli::{CacheArgs, CommonConfigArgs, QuestsCommand};

pub fn run(command: QuestsCommand) -> Result<()> {
    match command {
        QuestsCommand::List { common } => list(&common),
        QuestsCommand::Resolve { name, common } => resolve(&name, &common),
    }
}

fn load_registry(common: &CommonConfigArgs) -> Result<QuestRegistry> {
    let merged = super::load(common, &CacheArgs::default())?;
    Ok(QuestRegistry::load(&merged.quest_dir, &merged.overrides)?)
}

fn list(common: &CommonConfigArgs) -> Result<()> {
    let registry = load_registry(common)?;

    for definition in registry.concrete() {
        println!(
            "{:<32} {}  {}",
            definition.full_name(),
            &definition.digest()[..12],
            definition.path.display()
        );
    }
    Ok(())
}

fn resolve(name: &str, common: &CommonConfigArgs) -> Result<()> {
    let registry = load_registry(common)?;
    let definition = registry.resolve(name)?;

    println!("{} -> {}", name, definition.full_name());
    println!("  requested: {}", definition.quest());
    println!("  file:      {}", definition.path.display());
    println!("  digest:    {}", definition.digest());
    Ok(())
}
