/// `annot render` command implementation
///
/// Prints the document that would be sent to the backend. Quests the template
/// depends on are still invoked (and cached) so their values can be filled in.
use anyhow::{Context as _, Result};
use serde_json::Value;

use crate::cli::{OutputFormat, RunArgs};

pub fn run(args: &RunArgs) -> Result<()> {
    let merged = super::load(&args.common, &args.cache)?;
    let ctx = super::open_context(&merged)?;
    let edits = super::collect_edits(&ctx, &args.inputs)?;

    let rendered = ctx
        .bind(&args.quest, edits)?
        .render_parse()
        .with_context(|| format!("Failed to render {}", args.quest))?;

    let document = Value::Object(rendered);
    match args.format {
        OutputFormat::Text => print!("{}", serde_yaml::to_string(&document)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
    }

    ctx.close()?;
    Ok(())
}
