// Common test utilities shared across integration tests
//
// Each test builds its own workspace: a temporary quest directory, an
// in-memory store shared by every context the test opens, and a counting
// generator registered as the `count` method. Nothing touches global state,
// so tests run in parallel.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use annot::backend::{Executor, GenerationRequest, Generator, RawCandidate};
use annot::source::NoSource;
use annot::{Context, ContextSettings, MemoryStore, Services, TripleStore};
use tempfile::TempDir;

/// Generator answering with a fixed candidate and counting its calls
pub struct CountingGenerator {
    answer: String,
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Generator for CountingGenerator {
    fn generate(&self, _request: &GenerationRequest) -> annot::Result<Vec<RawCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RawCandidate {
            text: self.answer.clone(),
            logprob: -0.25,
        }])
    }
}

/// Generative definition using the counting generator
pub fn counted_quest(args: &str) -> String {
    format!(
        "args:\n{}---\nmethod: count\nlegal_answer_type: int\nprompt:\n  - user: \"{{{{ post.content }}}}\"\n",
        args
    )
}

/// Definition returning a fixed value
pub fn static_quest(value: &str) -> String {
    format!("args: {{}}\n---\nmethod: static\nvalue: {}\n", value)
}

/// Definition evaluating an arithmetic expression
pub fn expr_quest(alias: &str, expr: &str) -> String {
    format!("args: {{}}\n{}---\nmethod: expr\nexpr: \"{}\"\n", alias, expr)
}

pub struct TestWorkspace {
    temp_dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<CountingGenerator>,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("quests")).unwrap();
        Self {
            temp_dir,
            store: Arc::new(MemoryStore::new()),
            generator: Arc::new(CountingGenerator::new("7")),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn quest_dir(&self) -> PathBuf {
        self.temp_dir.path().join("quests")
    }

    pub fn write_quest(&self, file_name: &str, content: &str) {
        fs::write(self.quest_dir().join(file_name), content).unwrap();
    }

    pub fn remove_quest(&self, file_name: &str) {
        fs::remove_file(self.quest_dir().join(file_name)).unwrap();
    }

    pub fn services(&self) -> Services {
        self.services_with_store(self.store.clone())
    }

    pub fn services_with_store(&self, store: Arc<dyn TripleStore>) -> Services {
        let executor = Executor::new().with_generator("count", self.generator.clone());
        Services::new(store, Arc::new(executor), Arc::new(NoSource))
    }

    pub fn settings(&self) -> ContextSettings {
        ContextSettings {
            quest_dir: self.quest_dir(),
            ..Default::default()
        }
    }

    /// Fresh context over the shared store
    pub fn context(&self) -> Context {
        Context::open(self.settings(), self.services()).unwrap()
    }

    pub fn context_with(&self, settings: ContextSettings) -> Context {
        Context::open(
            ContextSettings {
                quest_dir: self.quest_dir(),
                ..settings
            },
            self.services(),
        )
        .unwrap()
    }

    pub fn calls(&self) -> usize {
        self.generator.calls()
    }
}
