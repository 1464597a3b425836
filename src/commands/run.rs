/// `annot run` command implementation
use anyhow::{Context as _, Result};
use serde_json::json;

use annot::edit::format_timestamp;

use crate::cli::{OutputFormat, RunArgs};
use crate::cli_utils::annot_prefix;

pub fn run(args: &RunArgs) -> Result<()> {
    let merged = super::load(&args.common, &args.cache)?;
    let ctx = super::open_context(&merged)?;
    let edits = super::collect_edits(&ctx, &args.inputs)?;

    let response = ctx
        .bind(&args.quest, edits)?
        .invoke()
        .with_context(|| format!("Failed to run {}", args.quest))?;
    let root = ctx.last_root();

    match (args.format, response) {
        (OutputFormat::Text, Some(response)) => println!("{}", response.output),
        (OutputFormat::Text, None) => {
            eprintln!("{} No cached result for {}", annot_prefix(), args.quest);
            println!("None");
        }
        (OutputFormat::Json, response) => {
            let report = json!({
                "quest": root.as_ref().map(|f| f.quest.to_string()),
                "dependencies": root
                    .as_ref()
                    .map(|f| f.dependencies.iter().map(|q| q.to_string()).collect::<Vec<_>>())
                    .unwrap_or_default(),
                "kind": response.as_ref().map(|r| r.output.kind()),
                "value": response.as_ref().map(|r| r.value()).transpose()?,
                "timestamp": response.as_ref().map(|r| format_timestamp(&r.timestamp)),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    ctx.close()?;
    Ok(())
}
