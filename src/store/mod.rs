//! Backing stores for cached annotations
//!
//! The engine never deletes. Stale results are excluded logically at lookup
//! time by the dependency filter in [`records`].

pub mod memory;
pub mod pattern;
pub mod records;
pub mod rocks;
pub mod sparql;

pub use memory::MemoryStore;
pub use pattern::{Bindings, Query, Term, Triple};
pub use rocks::RocksStore;
pub use sparql::SparqlStore;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Storage backend trait for triple/pattern stores
///
/// Implementations must be safe to share between contexts running on
/// different threads; each call is one self-contained request.
pub trait TripleStore: Send + Sync {
    /// Idempotently add triples
    fn insert(&self, triples: &[Triple]) -> Result<()>;

    /// Return every solution of the query
    fn query(&self, query: &Query) -> Result<Vec<Bindings>>;

    /// Human-readable location, for logs
    fn location(&self) -> String;
}

/// Open a store from its URL
///
/// - `memory://` - process-local, lost on exit
/// - `rocksdb://<path>` - persistent local store
/// - `http(s)://<dataset>` - SPARQL 1.1 endpoint (`<dataset>/query`, `<dataset>/update`)
pub fn open_store(url: &str, dump_dir: Option<PathBuf>) -> Result<Arc<dyn TripleStore>> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }

    if let Some(path) = url.strip_prefix("rocksdb://") {
        return Ok(Arc::new(RocksStore::open(PathBuf::from(path))?));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let mut store = SparqlStore::new(url);
        if let Some(dir) = dump_dir {
            store = store.with_dump_dir(dir);
        }
        return Ok(Arc::new(store));
    }

    Err(Error::config(format!(
        "unsupported store url '{}': expected memory://, rocksdb://<path> or http(s)://",
        url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_memory_store() {
        let store = open_store("memory://", None).unwrap();
        assert_eq!(store.location(), "memory://");
    }

    #[test]
    fn test_open_rocks_store() {
        let temp = TempDir::new().unwrap();
        let url = format!("rocksdb://{}", temp.path().join("db").display());
        let store = open_store(&url, None).unwrap();
        assert!(store.location().starts_with("rocksdb://"));
    }

    #[test]
    fn test_open_unknown_scheme() {
        assert!(matches!(
            open_store("s3://bucket", None),
            Err(Error::Config(_))
        ));
    }
}
