use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::AnnotConfig;
use crate::xdg;

pub const CONFIG_FILE: &str = "annot.toml";

/// Find `annot.toml` in `start_dir` or its ancestors, then the user config
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    if let Some(found) = start_dir
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
    {
        return Some(found);
    }

    let global = xdg::config_dir().join("config.toml");
    global.is_file().then_some(global)
}

/// Load the explicit config file, or the discovered one
///
/// Returns `Ok(None)` when no file is given and none is found.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<Option<(PathBuf, AnnotConfig)>> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => {
            let current_dir = std::env::current_dir()
                .context("Failed to get current directory for config discovery")?;
            match discover_config(&current_dir) {
                Some(path) => path,
                None => return Ok(None),
            }
        }
    };

    let config = AnnotConfig::from_file(&path)?;
    Ok(Some((path, config)))
}
