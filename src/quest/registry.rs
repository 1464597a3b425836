/// Quest discovery and version resolution
///
/// Scans a directory for files named `<base>_<major>_<minor>.yaml` and makes
/// each resolvable under four names:
///
/// - `<base>_<major>_<minor>`: exactly that revision
/// - `<base>_<major>`: latest minor of that major
/// - `<base>`: latest revision overall
/// - `<base>_latest`: explicit alias of `<base>`
///
/// "Latest" means the strictly greatest `(major, minor)` tuple. Two files
/// declaring the same exact version are a configuration error.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::args::Args;
use super::Definition;
use crate::error::{Error, Result};

/// Parsed `<base>_<major>_<minor>` filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    pub base: String,
    pub major: u32,
    pub minor: u32,
}

impl VersionedName {
    /// Parse a file name such as `humor_score_1_3.yaml`
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name
            .strip_suffix(".yaml")
            .or_else(|| file_name.strip_suffix(".yml"))?;
        Self::parse(stem)
    }

    /// Parse a bare name such as `humor_score_1_3`
    pub fn parse(stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '_');
        let minor = parse_version(parts.next()?)?;
        let major = parse_version(parts.next()?)?;
        let base = parts.next()?;
        if base.is_empty() {
            return None;
        }
        Some(Self {
            base: base.to_string(),
            major,
            minor,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}_{}_{}", self.base, self.major, self.minor)
    }

    pub fn major_name(&self) -> String {
        format!("{}_{}", self.base, self.major)
    }
}

fn parse_version(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Resolvable definitions of one context
#[derive(Debug, Clone, Default)]
pub struct QuestRegistry {
    dir: PathBuf,
    entries: HashMap<String, Arc<Definition>>,
    concrete: BTreeMap<String, Arc<Definition>>,
}

impl QuestRegistry {
    /// Scan `dir` recursively and build every alias
    ///
    /// `overrides` maps a resolvable name (any of the four forms) to the
    /// context-level argument overrides attached to that name.
    pub fn load(dir: &Path, overrides: &HashMap<String, Args>) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::config(format!(
                "quest directory does not exist: {}",
                dir.display()
            )));
        }

        let mut concrete: BTreeMap<String, Arc<Definition>> = BTreeMap::new();

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        for file in files {
            let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(versioned) = VersionedName::from_file_name(file_name) else {
                warn!(
                    file = %file.display(),
                    "ignoring file not named as name_major_minor.yaml"
                );
                continue;
            };

            let full_name = versioned.full_name();
            if let Some(existing) = concrete.get(&full_name) {
                return Err(Error::config(format!(
                    "two copies of {} detected: {} and {}",
                    full_name,
                    file.display(),
                    existing.path.display()
                )));
            }

            let definition =
                Definition::load(&file, &versioned.base, versioned.major, versioned.minor)?;
            debug!(quest = %full_name, digest = %definition.digest(), "loaded definition");
            concrete.insert(full_name, Arc::new(definition));
        }

        Ok(Self::from_definitions(dir, concrete, overrides))
    }

    fn from_definitions(
        dir: &Path,
        concrete: BTreeMap<String, Arc<Definition>>,
        overrides: &HashMap<String, Args>,
    ) -> Self {
        let overrides_for = |name: &str| overrides.get(name).cloned().unwrap_or_default();

        let mut latest_major: HashMap<String, Arc<Definition>> = HashMap::new();
        let mut latest: HashMap<String, Arc<Definition>> = HashMap::new();

        for def in concrete.values() {
            let major_name = format!("{}_{}", def.name, def.parsed_major);
            let newer_minor = latest_major
                .get(&major_name)
                .map(|cur| def.parsed_minor > cur.parsed_minor)
                .unwrap_or(true);
            if newer_minor {
                latest_major.insert(major_name, def.clone());
            }

            let newer = latest
                .get(&def.name)
                .map(|cur| {
                    (def.parsed_major, def.parsed_minor) > (cur.parsed_major, cur.parsed_minor)
                })
                .unwrap_or(true);
            if newer {
                latest.insert(def.name.clone(), def.clone());
            }
        }

        let mut entries: HashMap<String, Arc<Definition>> = HashMap::new();

        for (full_name, def) in &concrete {
            let full_overrides = overrides_for(full_name);
            let entry = if full_overrides.is_empty() {
                def.clone()
            } else {
                Arc::new(def.aliased(
                    Some(def.parsed_major),
                    Some(def.parsed_minor),
                    full_overrides,
                ))
            };
            entries.insert(full_name.clone(), entry);
        }

        for (major_name, def) in latest_major {
            let aliased = def.aliased(Some(def.parsed_major), None, overrides_for(&major_name));
            entries.insert(major_name, Arc::new(aliased));
        }

        for (name, def) in latest {
            let aliased = def.aliased(None, None, overrides_for(&name));
            entries.insert(name.clone(), Arc::new(aliased));

            let latest_name = format!("{}_latest", name);
            let aliased = def.aliased(None, None, overrides_for(&latest_name));
            entries.insert(latest_name, Arc::new(aliased));
        }

        Self {
            dir: dir.to_path_buf(),
            entries,
            concrete,
        }
    }

    /// Resolve any of the four name forms to a definition
    pub fn resolve(&self, name: &str) -> Result<Arc<Definition>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownQuest(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Digests of every concrete definition currently loaded
    ///
    /// A cached result is only valid if all of its dependencies are in here.
    pub fn recognized_digests(&self) -> HashSet<String> {
        self.concrete
            .values()
            .map(|def| def.digest().to_string())
            .collect()
    }

    /// Every resolvable name, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Concrete definitions keyed by full name
    pub fn concrete(&self) -> impl Iterator<Item = &Arc<Definition>> {
        self.concrete.values()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
