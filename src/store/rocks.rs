use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::pattern::{evaluate, Bindings, Query, Triple};
use super::TripleStore;
use crate::error::{Error, Result};

/// Persistent local triple store backed by RocksDB
///
/// Each triple is one key (its JSON encoding) with an empty value, so
/// re-inserting a triple is a no-op. Queries scan the keyspace and run the
/// shared pattern evaluator; local caches are small enough for that.
pub struct RocksStore {
    path: PathBuf,
    db: DB,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
        // Disable statistics to reduce overhead
        opts.set_statistics_level(rocksdb::statistics::StatsLevel::DisableAll);

        let db = DB::open(&opts, &path)?;
        debug!(path = %path.display(), "opened rocksdb store");
        Ok(Self { path, db })
    }

    fn load(&self) -> Result<Vec<Triple>> {
        let mut triples = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            let triple: Triple = serde_json::from_slice(&key)
                .map_err(|e| Error::store(format!("corrupt triple in {}: {}", self.path.display(), e)))?;
            triples.push(triple);
        }
        Ok(triples)
    }
}

impl TripleStore for RocksStore {
    fn insert(&self, triples: &[Triple]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for triple in triples {
            batch.put(serde_json::to_vec(triple)?, b"");
        }
        self.db.write(batch)?;
        debug!(entry_count = triples.len(), "inserted triples");
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Bindings>> {
        Ok(evaluate(&self.load()?, query))
    }

    fn location(&self) -> String {
        format!("rocksdb://{}", self.path.display())
    }
}
