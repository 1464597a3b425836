use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::pattern::{evaluate, Bindings, Query, Triple};
use super::TripleStore;
use crate::error::{Error, Result};

#[derive(Default)]
struct Graph {
    triples: Vec<Triple>,
    seen: HashSet<Triple>,
}

/// Process-local triple store
///
/// Keeps insertion order and ignores duplicate triples. Counts queries so
/// callers can observe whether a lookup reached the store at all.
#[derive(Default)]
pub struct MemoryStore {
    graph: RwLock<Graph>,
    queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.read().map(|g| g.triples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn triples(&self) -> Vec<Triple> {
        self.graph
            .read()
            .map(|g| g.triples.clone())
            .unwrap_or_default()
    }
}

impl TripleStore for MemoryStore {
    fn insert(&self, triples: &[Triple]) -> Result<()> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| Error::store("memory store lock poisoned"))?;
        for triple in triples {
            if graph.seen.insert(triple.clone()) {
                graph.triples.push(triple.clone());
            }
        }
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Bindings>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let graph = self
            .graph
            .read()
            .map_err(|_| Error::store("memory store lock poisoned"))?;
        Ok(evaluate(&graph.triples, query))
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
