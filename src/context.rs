//! Invocation contexts
//!
//! A [`Context`] bundles everything one annotation run needs: the loaded
//! definitions, cache flags, argument overrides, the backing store, the
//! in-memory memo and the call stack. It belongs to the thread that opened
//! it. It can be moved, but every operation checks the calling thread and
//! fails with [`Error::ContextOwnership`] elsewhere. Independent contexts can
//! run in parallel; they only share the store.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{debug, info};

use crate::backend::Executor;
use crate::call_stack::{CallStack, Frame};
use crate::edit::{Edit, EditPool};
use crate::engine::{self, InvocationKey, Memoized};
use crate::error::{Error, Result};
use crate::output::Response;
use crate::quest::args::{Args, MergeMode};
use crate::quest::{Definition, QuestRegistry};
use crate::source::{ContentSource, NoSource};
use crate::store::{MemoryStore, TripleStore};

/// Per-context settings
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub quest_dir: PathBuf,
    pub read_cache: bool,
    pub write_cache: bool,
    /// Never execute; a cache miss yields no result
    pub only_cache: bool,
    /// Overrides attached to one resolvable name (`humor`, `humor_1`, `humor_1_2`)
    pub overrides: HashMap<String, Args>,
    /// Overrides offered to every quest; keys a quest does not declare are skipped
    pub global_overrides: Args,
    pub merge_mode: MergeMode,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            quest_dir: PathBuf::from("quests"),
            read_cache: true,
            write_cache: true,
            only_cache: false,
            overrides: HashMap::new(),
            global_overrides: Args::new(),
            merge_mode: MergeMode::Strict,
        }
    }
}

/// Shared collaborators of a context
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TripleStore>,
    pub executor: Arc<Executor>,
    pub source: Arc<dyn ContentSource>,
}

impl Services {
    pub fn new(store: Arc<dyn TripleStore>, executor: Arc<Executor>, source: Arc<dyn ContentSource>) -> Self {
        Self {
            store,
            executor,
            source,
        }
    }

    /// In-memory store, `static`/`expr` only, no content source
    pub fn local() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Executor::new()),
            Arc::new(NoSource),
        )
    }
}

pub struct Context {
    owner: ThreadId,
    settings: ContextSettings,
    registry: QuestRegistry,
    recognized: HashSet<String>,
    services: Services,
    pool: EditPool,
    call_stack: RefCell<CallStack>,
    memo: RefCell<HashMap<InvocationKey, Option<Memoized>>>,
    last_root: RefCell<Option<Frame>>,
}

impl Context {
    /// Load the definitions and open a fresh scope on the current thread
    pub fn open(settings: ContextSettings, services: Services) -> Result<Self> {
        let registry = QuestRegistry::load(&settings.quest_dir, &settings.overrides)?;
        let recognized = registry.recognized_digests();
        info!(
            quests = recognized.len(),
            store = %services.store.location(),
            read_cache = settings.read_cache,
            write_cache = settings.write_cache,
            only_cache = settings.only_cache,
            "context opened"
        );

        Ok(Self {
            owner: thread::current().id(),
            settings,
            registry,
            recognized,
            pool: EditPool::new(services.source.clone()),
            services,
            call_stack: RefCell::new(CallStack::new()),
            memo: RefCell::new(HashMap::new()),
            last_root: RefCell::new(None),
        })
    }

    /// Tear the scope down; only the owning thread may do so
    pub fn close(self) -> Result<()> {
        self.check_owner()?;
        debug!(memoized = self.memo.borrow().len(), "context closed");
        Ok(())
    }

    pub fn check_owner(&self) -> Result<()> {
        let current = thread::current().id();
        if current != self.owner {
            return Err(Error::ContextOwnership {
                owner: format!("{:?}", self.owner),
                current: format!("{:?}", current),
            });
        }
        Ok(())
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn registry(&self) -> &QuestRegistry {
        &self.registry
    }

    pub fn recognized_digests(&self) -> &HashSet<String> {
        &self.recognized
    }

    pub fn store(&self) -> &dyn TripleStore {
        self.services.store.as_ref()
    }

    pub fn executor(&self) -> &Executor {
        &self.services.executor
    }

    /// Edits fetched through this context's content source
    pub fn pool(&self) -> &EditPool {
        &self.pool
    }

    pub fn call_stack(&self) -> &RefCell<CallStack> {
        &self.call_stack
    }

    /// Depth of the call stack (0 outside an invocation)
    pub fn depth(&self) -> usize {
        self.call_stack.borrow().depth()
    }

    /// Root frame of the most recent top-level invocation
    pub fn last_root(&self) -> Option<Frame> {
        self.last_root.borrow().clone()
    }

    pub(crate) fn set_last_root(&self, frame: Frame) {
        *self.last_root.borrow_mut() = Some(frame);
    }

    pub(crate) fn memo_get(&self, key: &InvocationKey) -> Option<Option<Memoized>> {
        self.memo.borrow().get(key).cloned()
    }

    pub(crate) fn memo_insert(&self, key: InvocationKey, entry: Option<Memoized>) {
        self.memo.borrow_mut().insert(key, entry);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Definition>> {
        self.check_owner()?;
        self.registry.resolve(name)
    }

    /// Invoke a quest by name
    pub fn invoke(&self, name: &str, edits: &[Arc<Edit>], overrides: &Args) -> Result<Option<Arc<Response>>> {
        let definition = self.resolve(name)?;
        engine::invoke(self, &definition, edits, overrides)
    }

    /// Bind a quest to its input edits
    pub fn bind(&self, name: &str, edits: Vec<Arc<Edit>>) -> Result<BoundQuest<'_>> {
        Ok(BoundQuest {
            context: self,
            definition: self.resolve(name)?,
            edits,
            overrides: Args::new(),
        })
    }
}

/// A quest bound to its inputs, ready to invoke
pub struct BoundQuest<'a> {
    context: &'a Context,
    definition: Arc<Definition>,
    edits: Vec<Arc<Edit>>,
    overrides: Args,
}

impl BoundQuest<'_> {
    /// Add caller-level overrides; a key may only be bound once
    pub fn with_args(mut self, overrides: Args) -> Result<Self> {
        for (key, value) in overrides {
            if let Some(existing) = self.overrides.get(&key) {
                return Err(Error::config(format!("{} already bound to {}", key, existing)));
            }
            self.overrides.insert(key, value);
        }
        Ok(self)
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn invoke(&self) -> Result<Option<Arc<Response>>> {
        engine::invoke(self.context, &self.definition, &self.edits, &self.overrides)
    }

    /// Render and parse the template without executing it
    pub fn render_parse(&self) -> Result<Args> {
        engine::render_parse(self.context, &self.definition, &self.edits, &self.overrides)
    }
}
