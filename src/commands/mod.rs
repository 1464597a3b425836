pub mod config;
pub mod export;
pub mod quests;
pub mod render;
pub mod run;

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use annot::backend::{Executor, OpenAiGenerator};
use annot::config_discovery::load_config_with_discovery;
use annot::edit::{parse_timestamp, Edit};
use annot::logging;
use annot::source::{ContentSource, MastodonSource, NoSource};
use annot::{open_store, Context, Services};

use crate::cli::{CacheArgs, CommonConfigArgs, InputArgs};
use crate::merger::MergedRunConfig;

/// Load and validate the config file, merge it with the command line and
/// initialize logging
pub fn load(common: &CommonConfigArgs, cache: &CacheArgs) -> Result<MergedRunConfig> {
    let file = load_config_with_discovery(common.config.as_deref().map(Path::new))?;
    let (path, file) = match file {
        Some((path, config)) => {
            config.validate()?;
            (Some(path), Some(config))
        }
        None => (None, None),
    };

    let merged = MergedRunConfig::merge(common, cache, file)?;
    logging::init(&merged.log_level);

    match path {
        Some(path) => info!("Using config: {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }
    Ok(merged)
}

/// Build the store, backends and content source, then open a context
pub fn open_context(merged: &MergedRunConfig) -> Result<Context> {
    let store = open_store(&merged.store_url, merged.dump_dir.clone())
        .with_context(|| format!("Failed to open store: {}", merged.store_url))?;

    let api_key = std::env::var(&merged.api_key_env).ok();
    let mut executor = Executor::new().with_generator(
        "openai",
        Arc::new(OpenAiGenerator::new(merged.openai_url.as_str(), api_key.clone())?),
    );
    if let Some(vllm_url) = &merged.vllm_url {
        executor = executor.with_generator("vllm", Arc::new(OpenAiGenerator::new(vllm_url.as_str(), api_key)?));
    }

    let source: Arc<dyn ContentSource> = match &merged.source_url {
        Some(url) => Arc::new(MastodonSource::new(url)?),
        None => Arc::new(NoSource),
    };

    let ctx = Context::open(
        merged.context_settings(),
        Services::new(store, Arc::new(executor), source),
    )
    .with_context(|| format!("Failed to load quests from {}", merged.quest_dir.display()))?;
    Ok(ctx)
}

/// Collect the edits named on the command line, in argument order per kind
pub fn collect_edits(ctx: &Context, inputs: &InputArgs) -> Result<Vec<Arc<Edit>>> {
    let mut edits = Vec::new();

    for spec in &inputs.edits {
        let (id, cutoff) = match spec.split_once('@') {
            Some((id, time)) => (id, Some(parse_timestamp(time)?)),
            None => (spec.as_str(), None),
        };
        let edit = ctx
            .pool()
            .post(id)
            .latest(cutoff)
            .with_context(|| format!("Failed to fetch post {}", spec))?;
        edits.push(edit);
    }

    for path in &inputs.files {
        edits.push(Edit::from_file(Path::new(path))?);
    }

    for text in &inputs.texts {
        edits.push(Edit::from_text(text.as_str()));
    }

    if edits.is_empty() {
        anyhow::bail!("No input given: pass --edit, --edit-file or --text");
    }
    Ok(edits)
}
