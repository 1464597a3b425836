/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// Environment variables are folded into the CLI layer by clap (`env = ...`),
/// so merging only has to prefer parsed arguments over the file.
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use annot::config::{default_store_url, AnnotConfig};
use annot::context::ContextSettings;
use annot::quest::args::{parse_override, Args, MergeMode};

use crate::cli::{CacheArgs, CommonConfigArgs};

/// Settings for one command run
#[derive(Debug, Clone, Serialize)]
pub struct MergedRunConfig {
    pub store_url: String,
    pub dump_dir: Option<PathBuf>,
    pub quest_dir: PathBuf,
    pub source_url: Option<String>,
    pub read_cache: bool,
    pub write_cache: bool,
    pub only_cache: bool,
    /// Overrides per resolvable quest name
    pub overrides: HashMap<String, Args>,
    pub global_overrides: Args,
    pub lenient: bool,
    pub openai_url: String,
    pub vllm_url: Option<String>,
    pub api_key_env: String,
    pub log_level: String,
}

impl MergedRunConfig {
    /// Merge configuration from CLI args and config file
    ///
    /// Cache flags on the command line can only switch caching off (or to
    /// cache-only); the file decides otherwise.
    pub fn merge(common: &CommonConfigArgs, cache: &CacheArgs, file_config: Option<AnnotConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let (overrides, global_overrides) = parse_overrides(&cache.args, &cache.args_global)?;

        let read_cache = file.cache.read && !cache.no_read && !cache.no_cache;
        let only_cache = (file.cache.only || cache.only_cache) && !cache.no_cache;

        Ok(Self {
            store_url: common
                .store_url
                .clone()
                .or(file.store.url)
                .unwrap_or_else(default_store_url),
            dump_dir: common
                .dump_dir
                .clone()
                .or(file.store.dump_dir)
                .map(PathBuf::from),
            quest_dir: PathBuf::from(common.quest_dir.clone().unwrap_or(file.quests.dir)),
            source_url: common.source_url.clone().or(file.source.url),
            read_cache: read_cache || only_cache,
            write_cache: file.cache.write && !cache.no_write && !cache.no_cache,
            only_cache,
            overrides,
            global_overrides,
            lenient: cache.lenient,
            openai_url: file.backend.openai_url,
            vllm_url: file.backend.vllm_url,
            api_key_env: file.backend.api_key_env,
            log_level: common
                .log_level
                .clone()
                .unwrap_or(file.observability.log_level),
        })
    }

    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            quest_dir: self.quest_dir.clone(),
            read_cache: self.read_cache,
            write_cache: self.write_cache,
            only_cache: self.only_cache,
            overrides: self.overrides.clone(),
            global_overrides: self.global_overrides.clone(),
            merge_mode: if self.lenient {
                MergeMode::Lenient
            } else {
                MergeMode::Strict
            },
        }
    }
}

/// Parse `quest:key=value` and `key=value` override lists
fn parse_overrides(per_quest: &[String], global: &[String]) -> Result<(HashMap<String, Args>, Args)> {
    let mut overrides: HashMap<String, Args> = HashMap::new();
    for item in per_quest {
        let (quest, pair) = item
            .split_once(':')
            .with_context(|| format!("--args '{}' must look like quest:key=value", item))?;
        let (key, value) = parse_override(pair)?;
        overrides.entry(quest.to_string()).or_default().insert(key, value);
    }

    let mut global_overrides = Args::new();
    for item in global {
        let (key, value) = parse_override(item)?;
        global_overrides.insert(key, value);
    }

    Ok((overrides, global_overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_overrides_file() {
        let mut file = AnnotConfig::default();
        file.store.url = Some("rocksdb:///from/file".to_string());
        file.quests.dir = "file-quests".to_string();
        let common = CommonConfigArgs {
            store_url: Some("memory://".to_string()),
            ..Default::default()
        };

        let merged = MergedRunConfig::merge(&common, &CacheArgs::default(), Some(file)).unwrap();
        assert_eq!(merged.store_url, "memory://");
        assert_eq!(merged.quest_dir, PathBuf::from("file-quests"));
        assert!(merged.read_cache && merged.write_cache && !merged.only_cache);
    }

    #[test]
    fn test_cache_flags() {
        let cache = CacheArgs {
            no_cache: true,
            ..Default::default()
        };
        let merged = MergedRunConfig::merge(&CommonConfigArgs::default(), &cache, None).unwrap();
        assert!(!merged.read_cache && !merged.write_cache);

        let cache = CacheArgs {
            only_cache: true,
            no_read: true,
            ..Default::default()
        };
        let merged = MergedRunConfig::merge(&CommonConfigArgs::default(), &cache, None).unwrap();
        assert!(merged.only_cache && merged.read_cache);
    }

    #[test]
    fn test_overrides_parsed() {
        let cache = CacheArgs {
            args: vec!["humor_1:temperature=0.5".into(), "humor_1:model=large".into()],
            args_global: vec!["n=3".into()],
            ..Default::default()
        };
        let merged = MergedRunConfig::merge(&CommonConfigArgs::default(), &cache, None).unwrap();
        assert_eq!(merged.overrides["humor_1"]["temperature"], json!(0.5));
        assert_eq!(merged.overrides["humor_1"]["model"], json!("large"));
        assert_eq!(merged.global_overrides["n"], json!(3));

        let bad = CacheArgs {
            args: vec!["temperature=0.5".into()],
            ..Default::default()
        };
        assert!(MergedRunConfig::merge(&CommonConfigArgs::default(), &bad, None).is_err());
    }
}
