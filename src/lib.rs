// Library interface for annot
// The binary and the integration tests build on these modules.

pub mod backend;
pub mod call_stack;
pub mod config;
pub mod config_discovery;
pub mod config_expansion;
pub mod context;
pub mod edit;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod output;
pub mod quest;
pub mod render;
pub mod source;
pub mod store;
pub mod xdg;

// Re-export commonly used types
pub use context::{BoundQuest, Context, ContextSettings, Services};
pub use edit::{Edit, EditPool};
pub use error::{Error, Result};
pub use output::{Output, Response};
pub use quest::args::Args;
pub use quest::{Definition, Quest, QuestRegistry};
pub use store::{open_store, MemoryStore, TripleStore};
