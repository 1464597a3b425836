//! Annotation definitions ("quests")
//!
//! - [`Quest`]: the identity of one definition (name, optional version, digest)
//! - [`definition`]: parsing a definition file into its spec and template
//! - [`registry`]: discovering definition files and resolving versioned names
//! - [`args`]: strict three-tier argument merging

pub mod args;
pub mod definition;
pub mod registry;

use std::fmt;

pub use definition::Definition;
pub use registry::QuestRegistry;

/// Identity of an annotation definition
///
/// `major`/`minor` set to `None` mean "any": the quest was requested through an
/// unversioned or major-only alias. Two quests are equal iff all four fields
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quest {
    pub name: String,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub digest: String,
}

impl Quest {
    pub fn new(
        name: impl Into<String>,
        major: Option<u32>,
        minor: Option<u32>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
            digest: digest.into(),
        }
    }
}

impl fmt::Display for Quest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "*".into());
        write!(
            f,
            "{}_{}_{} ({})",
            self.name,
            version(self.major),
            version(self.minor),
            &self.digest[..self.digest.len().min(12)]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quest_equality_includes_version() {
        let a = Quest::new("humor", Some(1), Some(0), "abc");
        let b = Quest::new("humor", None, None, "abc");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_quest_display() {
        let q = Quest::new("humor", Some(1), None, "0123456789abcdef");
        assert_eq!(q.to_string(), "humor_1_* (0123456789ab)");
    }
}
