//! XDG base directories for annot
//!
//! - `$XDG_CONFIG_HOME/annot/` (default `~/.config/annot/`): user configuration
//! - `$XDG_CACHE_HOME/annot/` (default `~/.cache/annot/`): the default record store

use std::path::PathBuf;

/// Directory holding the user-level `config.toml`
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("annot")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join("annot")
    } else {
        PathBuf::from(".annot-config")
    }
}

/// Directory holding the default RocksDB store
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join("annot")
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join("annot")
    } else {
        PathBuf::from(".annot-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_dir_respects_xdg_env() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        assert_eq!(config_dir(), PathBuf::from("/tmp/test-config/annot"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    #[serial]
    fn test_cache_dir_respects_xdg_env() {
        std::env::set_var("XDG_CACHE_HOME", "/tmp/test-cache");
        assert_eq!(cache_dir(), PathBuf::from("/tmp/test-cache/annot"));
        std::env::remove_var("XDG_CACHE_HOME");
    }
}
