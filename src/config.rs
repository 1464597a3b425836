use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config_expansion::expand_env_vars;
use crate::xdg;

/// Complete annot configuration (loaded from `annot.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnnotConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub quests: QuestsConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Backing store of cache records
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// `memory://`, `rocksdb://<path>` or a SPARQL dataset `http(s)://...`
    /// Defaults to a RocksDB store under the XDG cache directory
    pub url: Option<String>,

    /// Directory receiving a copy of every update sent to a SPARQL store
    pub dump_dir: Option<String>,
}

/// Where definition files live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestsConfig {
    #[serde(default = "default_quest_dir")]
    pub dir: String,
}

impl Default for QuestsConfig {
    fn default() -> Self {
        Self {
            dir: default_quest_dir(),
        }
    }
}

/// Content source for remote posts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    /// Mastodon-compatible API base, e.g. `https://mastodon.social/api`
    pub url: Option<String>,
}

/// Cache behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub read: bool,

    #[serde(default = "default_true")]
    pub write: bool,

    /// Never execute; only serve stored results
    #[serde(default)]
    pub only: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            only: false,
        }
    }
}

/// Generative backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_openai_url")]
    pub openai_url: String,

    /// OpenAI-compatible vLLM server; the `vllm` method is only available when set
    pub vllm_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            openai_url: default_openai_url(),
            vllm_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace|debug|info|warn|error), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_quest_dir() -> String {
    "quests".to_string()
}

fn default_true() -> bool {
    true
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Store used when neither the command line nor the file names one
pub fn default_store_url() -> String {
    format!("rocksdb://{}", xdg::cache_dir().join("store").display())
}

const STORE_SCHEMES: [&str; 4] = ["memory://", "rocksdb://", "http://", "https://"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AnnotConfig {
    /// Load from a TOML file, expanding `${VAR}` references first
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let content = expand_env_vars(&content)
            .with_context(|| format!("Failed to expand config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Example configuration as TOML
    pub fn example() -> Result<String> {
        let config = AnnotConfig {
            store: StoreConfig {
                url: Some("rocksdb://.annot/store".to_string()),
                dump_dir: None,
            },
            source: SourceConfig {
                url: Some("https://mastodon.social/api".to_string()),
            },
            ..Default::default()
        };
        Ok(toml::to_string_pretty(&config)?)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.store.url {
            if url != "memory" && !STORE_SCHEMES.iter().any(|s| url.starts_with(s)) {
                anyhow::bail!(
                    "store.url must start with memory://, rocksdb://, http:// or https://: {}",
                    url
                );
            }
            if url == "rocksdb://" {
                anyhow::bail!("store.url rocksdb:// needs a path");
            }
        }

        if self.quests.dir.trim().is_empty() {
            anyhow::bail!("quests.dir must be set");
        }

        if let Some(url) = &self.source.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("source.url must start with http:// or https://: {}", url);
            }
        }

        if self.cache.only && !self.cache.read {
            anyhow::bail!("cache.only requires cache.read");
        }

        if !LOG_LEVELS.contains(&self.observability.log_level.to_lowercase().as_str()) {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        Ok(())
    }

    pub fn quest_dir(&self) -> PathBuf {
        PathBuf::from(&self.quests.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AnnotConfig::default();
        assert_eq!(config.quests.dir, "quests");
        assert!(config.cache.read);
        assert!(config.cache.write);
        assert!(!config.cache.only);
        assert_eq!(config.backend.api_key_env, "OPENAI_API_KEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nurl = \"memory://\"\n\n[cache]\nwrite = false").unwrap();

        let config = AnnotConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.url.as_deref(), Some("memory://"));
        assert!(!config.cache.write);
        assert!(config.cache.read);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_invalid_store_scheme() {
        let mut config = AnnotConfig::default();
        config.store.url = Some("s3://bucket".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_quest_dir() {
        let mut config = AnnotConfig::default();
        config.quests.dir = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_only_cache_requires_read() {
        let mut config = AnnotConfig::default();
        config.cache.only = true;
        config.cache.read = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips() {
        let example = AnnotConfig::example().unwrap();
        let config: AnnotConfig = toml::from_str(&example).unwrap();
        assert!(config.validate().is_ok());
    }
}
