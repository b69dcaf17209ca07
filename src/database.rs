// Index store (SQLite)
// Functions, call edges and pre/postconditions in normalized tables

mod models;
mod schema;
mod store;

pub use models::{CalleeRow, ConditionKind, FunctionRecord, FunctionTree, IndexStats, TreeNode};
pub use schema::SCHEMA;
pub use store::IndexStore;
