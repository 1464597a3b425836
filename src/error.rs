//! Error types for the annotation engine
//!
//! Library code returns [`Result`]; the CLI layer wraps these in `anyhow`.
//! Variants follow the failure taxonomy of the engine: configuration mistakes
//! are fatal, incompatible cache records are recovered as misses, store and
//! content-source failures surface as their own variants.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Duplicate definition versions, unknown override keys, malformed
    /// definition files, undefined template variables
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored record was written by an incompatible cache format
    #[error("Incompatible cache record: {0}")]
    IncompatibleCache(String),

    /// The backing store answered with a non-success status
    #[error("Store error: {0}")]
    Store(String),

    /// A requested content snapshot does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend produced no candidate coercible to the declared type
    #[error("No legal annotations in backend output: {0}")]
    Legality(String),

    /// The execution backend failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// A name could not be resolved to a loaded definition
    #[error("Unknown quest: {0}")]
    UnknownQuest(String),

    /// A context was used from a thread other than the one that opened it
    #[error("Context opened on thread {owner} used from thread {current}")]
    ContextOwnership { owner: String, current: String },

    /// `current()` was called outside an active invocation
    #[error("Call stack is empty")]
    EmptyCallStack,

    /// A stored expression could not be evaluated
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    pub fn incompatible(msg: impl Into<String>) -> Self {
        Error::IncompatibleCache(msg.into())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = Error::config("two copies of q_1_0");
        let msg = err.to_string();
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("q_1_0"));
    }

    #[test]
    fn test_error_display_ownership() {
        let err = Error::ContextOwnership {
            owner: "ThreadId(1)".to_string(),
            current: "ThreadId(2)".to_string(),
        };
        assert!(err.to_string().contains("ThreadId(2)"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
