use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FunctionRecord {
    pub function_id: i64,
    pub name: String,
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
    pub summary: String,
}

impl FunctionRecord {
    pub fn is_summarized(&self) -> bool {
        !self.summary.trim().is_empty()
    }
}

/// A callee joined with its function row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CalleeRow {
    pub function_id: i64,
    pub function: String,
    pub file: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_functions: usize,
    pub total_call_edges: usize,
    pub summarized_functions: usize,
    /// Functions that never appear as a caller in `call_edges`
    pub leaf_functions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Precondition,
    Postcondition,
}

impl ConditionKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            ConditionKind::Precondition => "preconditions",
            ConditionKind::Postcondition => "postconditions",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Precondition => "precondition",
            ConditionKind::Postcondition => "postcondition",
        }
    }
}

/// Nested view of a function and everything it calls.
///
/// Serializes to `{"cycle_detected": true}` / `{"max_depth_reached": true}` /
/// `{"error": ...}` for the markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FunctionTree {
    Node(TreeNode),
    Cycle { cycle_detected: bool },
    MaxDepth { max_depth_reached: bool },
    Missing { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub function_id: i64,
    pub function: String,
    pub file: String,
    pub summary: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub postconditions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub callees: Vec<FunctionTree>,
}

impl FunctionTree {
    pub fn cycle() -> Self {
        FunctionTree::Cycle {
            cycle_detected: true,
        }
    }

    pub fn max_depth() -> Self {
        FunctionTree::MaxDepth {
            max_depth_reached: true,
        }
    }

    pub fn as_node(&self) -> Option<&TreeNode> {
        match self {
            FunctionTree::Node(node) => Some(node),
            _ => None,
        }
    }
}
