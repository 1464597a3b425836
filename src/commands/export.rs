/// `annot export` command implementation
///
/// Reads the store only; no definitions need to be loaded.
use anyhow::{Context as _, Result};
use serde_json::{json, Map, Value};
use tracing::info;

use annot::edit::format_timestamp;
use annot::open_store;
use annot::store::records;

use crate::cli::{CacheArgs, ExportArgs, OutputFormat};

pub fn run(args: &ExportArgs) -> Result<()> {
    let merged = super::load(&args.common, &CacheArgs::default())?;
    let store = open_store(&merged.store_url, merged.dump_dir.clone())
        .with_context(|| format!("Failed to open store: {}", merged.store_url))?;

    let latest = records::export(store.as_ref(), &args.quest, args.major, args.minor)?;
    info!(quest = %args.quest, operation = "export", entry_count = latest.len(), "exported");

    match args.format {
        OutputFormat::Text => {
            for (post, (timestamp, output)) in &latest {
                println!("{}\t{}\t{}", post, format_timestamp(timestamp), output);
            }
        }
        OutputFormat::Json => {
            let mut report = Map::new();
            for (post, (timestamp, output)) in &latest {
                report.insert(
                    post.clone(),
                    json!({
                        "timestamp": format_timestamp(timestamp),
                        "kind": output.kind(),
                        "value": output.value()?,
                    }),
                );
            }
            println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
        }
    }
    Ok(())
}
