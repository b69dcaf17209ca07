// callgraph-index library entry point
// parse -> call graph -> index store -> bottom-up summarization scheduler

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod language;
pub mod parser;
pub mod project;
pub mod reporter;
pub mod scanner;
pub mod scheduler;

// Index store (SQLite)
pub mod database;

// Re-exports
pub use cache::ProjectCache;
pub use config::{IndexerConfig, SchedulerConfig};
pub use database::{ConditionKind, FunctionTree, IndexStore};
pub use error::{IndexError, Result};
pub use graph::{CallGraphBuilder, CallGraphNode, Populator};
pub use language::Language;
pub use project::{FileIndex, ProjectIndex, Span};
pub use scanner::Scanner;
pub use scheduler::{BatchResult, FunctionRef, NextTarget, Scheduler, UpdateOutcome};
