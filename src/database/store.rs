use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use tokio::runtime::{Builder, Runtime};

use super::models::*;
use super::schema::SCHEMA;
use crate::error::{IndexError, Result};

const SUMMARIZED: &str = "TRIM(COALESCE(summary, '')) != ''";

/// Normalized SQLite store of functions, call edges and conditions.
///
/// sqlx is async; every method here drives it on a private current-thread
/// runtime and blocks until the statement commits.
pub struct IndexStore {
    pool: SqlitePool,
    runtime: Runtime,
}

impl IndexStore {
    /// Open the database file, creating it and its directory if missing.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        Self::connect(options, 5)
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(options, 1)
    }

    fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| IndexError::io("tokio runtime", e))?;

        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options),
        )?;

        let store = Self { pool, runtime };
        store.init_schema()?;
        Ok(store)
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Create tables and indexes (idempotent).
    pub fn init_schema(&self) -> Result<()> {
        self.block_on(sqlx::query(SCHEMA).execute(&self.pool))?;
        Ok(())
    }

    /// Insert a function, or return the id of the existing `(name, file)` row.
    /// Attributes of a repeated insert are discarded.
    pub fn add_function(
        &self,
        name: &str,
        file: &str,
        start_line: i64,
        end_line: i64,
        summary: &str,
    ) -> Result<i64> {
        self.block_on(async {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO functions (name, file, start_line, end_line, summary) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(file)
            .bind(start_line)
            .bind(end_line)
            .bind(summary)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() > 0 {
                return Ok::<_, IndexError>(inserted.last_insert_rowid());
            }

            let (id,): (i64,) =
                sqlx::query_as("SELECT function_id FROM functions WHERE name = ? AND file = ?")
                    .bind(name)
                    .bind(file)
                    .fetch_one(&self.pool)
                    .await?;
            Ok::<_, IndexError>(id)
        })
    }

    /// Record `caller -> callee`. Returns false when the edge already existed.
    pub fn add_call_edge(&self, caller_id: i64, callee_id: i64) -> Result<bool> {
        let result = self.block_on(
            sqlx::query("INSERT OR IGNORE INTO call_edges (caller_id, callee_id) VALUES (?, ?)")
                .bind(caller_id)
                .bind(callee_id)
                .execute(&self.pool),
        )?;
        Ok(result.rows_affected() > 0)
    }

    pub fn function(&self, function_id: i64) -> Result<Option<FunctionRecord>> {
        let row = self.block_on(
            sqlx::query_as::<_, FunctionRecord>(
                r#"
                SELECT function_id, name, file,
                       COALESCE(start_line, 0) AS start_line,
                       COALESCE(end_line, 0) AS end_line,
                       COALESCE(summary, '') AS summary
                FROM functions WHERE function_id = ?
                "#,
            )
            .bind(function_id)
            .fetch_optional(&self.pool),
        )?;
        Ok(row)
    }

    /// Lowest id carrying `name`. Names are not unique; prefer ids.
    pub fn find_function_id(&self, name: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = self.block_on(
            sqlx::query_as(
                "SELECT function_id FROM functions WHERE name = ? ORDER BY function_id LIMIT 1",
            )
            .bind(name)
            .fetch_optional(&self.pool),
        )?;
        Ok(row.map(|r| r.0))
    }

    pub fn function_ids(&self) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = self.block_on(
            sqlx::query_as("SELECT function_id FROM functions ORDER BY function_id")
                .fetch_all(&self.pool),
        )?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    fn select_functions(&self, filter: &str, order: &str) -> Result<Vec<FunctionRecord>> {
        let sql = format!(
            r#"
            SELECT function_id, name, file,
                   COALESCE(start_line, 0) AS start_line,
                   COALESCE(end_line, 0) AS end_line,
                   COALESCE(summary, '') AS summary
            FROM functions WHERE {} ORDER BY {}
            "#,
            filter, order
        );
        let rows = self.block_on(sqlx::query_as::<_, FunctionRecord>(&sql).fetch_all(&self.pool))?;
        Ok(rows)
    }

    /// All functions ordered by name, then file.
    pub fn list_functions(&self) -> Result<Vec<FunctionRecord>> {
        self.select_functions("1 = 1", "name, file")
    }

    /// Functions without a (non-blank) summary, by id.
    pub fn unsummarized(&self) -> Result<Vec<FunctionRecord>> {
        self.select_functions(&format!("NOT ({})", SUMMARIZED), "function_id")
    }

    /// Set the summary; false when no such function exists.
    pub fn update_summary(&self, function_id: i64, summary: &str) -> Result<bool> {
        let result = self.block_on(
            sqlx::query("UPDATE functions SET summary = ? WHERE function_id = ?")
                .bind(summary)
                .bind(function_id)
                .execute(&self.pool),
        )?;
        Ok(result.rows_affected() > 0)
    }

    /// Direct callees in the order their edges were recorded.
    pub fn get_callees(&self, function_id: i64) -> Result<Vec<CalleeRow>> {
        let rows = self.block_on(
            sqlx::query_as::<_, CalleeRow>(
                r#"
                SELECT f.function_id, f.name AS function, f.file,
                       COALESCE(f.summary, '') AS summary
                FROM call_edges ce
                JOIN functions f ON ce.callee_id = f.function_id
                WHERE ce.caller_id = ?
                ORDER BY ce.rowid
                "#,
            )
            .bind(function_id)
            .fetch_all(&self.pool),
        )?;
        Ok(rows)
    }

    pub fn conditions(&self, function_id: i64, kind: ConditionKind) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT condition_text FROM {} WHERE function_id = ? ORDER BY sequence_order",
            kind.table()
        );
        let rows: Vec<(String,)> = self.block_on(
            sqlx::query_as(&sql)
                .bind(function_id)
                .fetch_all(&self.pool),
        )?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Append a condition; returns its sequence number (0 for the first).
    pub fn add_condition(&self, function_id: i64, kind: ConditionKind, text: &str) -> Result<i64> {
        let next_sql = format!(
            "SELECT COALESCE(MAX(sequence_order), -1) + 1 FROM {} WHERE function_id = ?",
            kind.table()
        );
        let insert_sql = format!(
            "INSERT INTO {} (function_id, condition_text, sequence_order) VALUES (?, ?, ?)",
            kind.table()
        );

        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            let (seq,): (i64,) = sqlx::query_as(&next_sql)
                .bind(function_id)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(&insert_sql)
                .bind(function_id)
                .bind(text)
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, IndexError>(seq)
        })
    }

    /// Nested tree of `function_id` and its callees.
    ///
    /// Each branch gets its own copy of the visited set: a function may appear
    /// once per path, and a repeat within one path is a cycle marker.
    pub fn get_function_tree(&self, function_id: i64, max_depth: Option<usize>) -> Result<FunctionTree> {
        self.build_tree(function_id, max_depth, 0, HashSet::new())
    }

    fn build_tree(
        &self,
        function_id: i64,
        max_depth: Option<usize>,
        depth: usize,
        mut visited: HashSet<i64>,
    ) -> Result<FunctionTree> {
        if visited.contains(&function_id) {
            return Ok(FunctionTree::cycle());
        }
        if max_depth.is_some_and(|max| depth >= max) {
            return Ok(FunctionTree::max_depth());
        }
        visited.insert(function_id);

        let Some(func) = self.function(function_id)? else {
            return Ok(FunctionTree::Missing {
                error: "function not found".to_string(),
            });
        };

        let preconditions = self.conditions(function_id, ConditionKind::Precondition)?;
        let postconditions = self.conditions(function_id, ConditionKind::Postcondition)?;

        let mut callees = Vec::new();
        for callee in self.get_callees(function_id)? {
            callees.push(self.build_tree(
                callee.function_id,
                max_depth,
                depth + 1,
                visited.clone(),
            )?);
        }

        Ok(FunctionTree::Node(TreeNode {
            function_id,
            function: func.name,
            file: func.file,
            summary: func.summary,
            start_line: func.start_line,
            end_line: func.end_line,
            preconditions,
            postconditions,
            callees,
        }))
    }

    pub fn get_stats(&self) -> Result<IndexStats> {
        self.block_on(async {
            let (total_functions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM functions")
                .fetch_one(&self.pool)
                .await?;
            let (total_call_edges,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM call_edges")
                .fetch_one(&self.pool)
                .await?;
            let (summarized,): (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM functions WHERE {}",
                SUMMARIZED
            ))
            .fetch_one(&self.pool)
            .await?;
            let (leaves,): (i64,) = sqlx::query_as(
                r#"
                SELECT COUNT(*) FROM functions
                WHERE function_id NOT IN (SELECT DISTINCT caller_id FROM call_edges)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

            Ok::<_, IndexError>(IndexStats {
                total_functions: total_functions as usize,
                total_call_edges: total_call_edges as usize,
                summarized_functions: summarized as usize,
                leaf_functions: leaves as usize,
            })
        })
    }

    /// Delete a function; edges and conditions cascade.
    pub fn delete_function(&self, function_id: i64) -> Result<bool> {
        let result = self.block_on(
            sqlx::query("DELETE FROM functions WHERE function_id = ?")
                .bind(function_id)
                .execute(&self.pool),
        )?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> IndexStore {
        IndexStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_add_function_is_idempotent() {
        let store = store();
        let first = store.add_function("f", "a.c", 1, 5, "").unwrap();
        let second = store.add_function("f", "a.c", 10, 20, "ignored").unwrap();
        assert_eq!(first, second);

        let record = store.function(first).unwrap().unwrap();
        assert_eq!(record.start_line, 1);
        assert_eq!(record.summary, "");

        // same name in another file is a different function
        let other = store.add_function("f", "b.c", 1, 5, "").unwrap();
        assert_ne!(first, other);
        assert_eq!(store.find_function_id("f").unwrap(), Some(first));
        assert_eq!(store.get_stats().unwrap().total_functions, 2);
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let store = store();
        let a = store.add_function("a", "x.c", 1, 2, "").unwrap();
        let b = store.add_function("b", "x.c", 3, 4, "").unwrap();
        assert!(store.add_call_edge(a, b).unwrap());
        assert!(!store.add_call_edge(a, b).unwrap());
        assert!(store.add_call_edge(b, a).unwrap());

        let callees = store.get_callees(a).unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].function, "b");
        assert_eq!(store.get_stats().unwrap().total_call_edges, 2);
    }

    #[test]
    fn test_condition_sequence_starts_at_zero() {
        let store = store();
        let f = store.add_function("f", "x.c", 1, 2, "").unwrap();
        let g = store.add_function("g", "x.c", 3, 4, "").unwrap();

        let seqs: Vec<i64> = (0..3)
            .map(|i| {
                store
                    .add_condition(f, ConditionKind::Precondition, &format!("p{}", i))
                    .unwrap()
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(
            store.add_condition(f, ConditionKind::Postcondition, "q").unwrap(),
            0
        );
        assert_eq!(
            store.add_condition(g, ConditionKind::Precondition, "r").unwrap(),
            0
        );
        assert_eq!(
            store.conditions(f, ConditionKind::Precondition).unwrap(),
            vec!["p0", "p1", "p2"]
        );
    }

    #[test]
    fn test_tree_cycles_and_depth() {
        let store = store();
        let a = store.add_function("a", "x.c", 1, 2, "").unwrap();
        let b = store.add_function("b", "x.c", 3, 4, "").unwrap();
        let c = store.add_function("c", "x.c", 5, 6, "").unwrap();
        store.add_call_edge(a, b).unwrap();
        store.add_call_edge(a, c).unwrap();
        store.add_call_edge(b, a).unwrap();
        store.add_call_edge(b, c).unwrap();

        let tree = store.get_function_tree(a, None).unwrap();
        let root = tree.as_node().unwrap();
        assert_eq!(root.function, "a");
        let b_node = root.callees[0].as_node().unwrap();
        assert_eq!(b_node.callees[0], FunctionTree::cycle());
        // c is reached on two paths and expanded on both
        assert_eq!(b_node.callees[1].as_node().unwrap().function, "c");
        assert_eq!(root.callees[1].as_node().unwrap().function, "c");

        let shallow = store.get_function_tree(a, Some(1)).unwrap();
        let root = shallow.as_node().unwrap();
        assert_eq!(root.callees, vec![FunctionTree::max_depth(), FunctionTree::max_depth()]);

        let json = serde_json::to_value(store.get_function_tree(a, Some(0)).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"max_depth_reached": true}));
        assert!(matches!(
            store.get_function_tree(999, None).unwrap(),
            FunctionTree::Missing { .. }
        ));
    }

    #[test]
    fn test_stats_and_summaries() {
        let store = store();
        let a = store.add_function("A", "a.c", 1, 2, "").unwrap();
        let b = store.add_function("B", "b.c", 1, 2, "").unwrap();
        store.add_function("C", "c.c", 1, 2, "").unwrap();
        store.add_call_edge(a, b).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(
            stats,
            IndexStats {
                total_functions: 3,
                total_call_edges: 1,
                summarized_functions: 0,
                leaf_functions: 2,
            }
        );

        assert!(store.update_summary(b, "returns zero").unwrap());
        assert!(store.update_summary(a, "   ").unwrap());
        assert!(!store.update_summary(42, "nobody").unwrap());
        assert_eq!(store.get_stats().unwrap().summarized_functions, 1);
        let names: Vec<_> = store
            .unsummarized()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn test_delete_cascades() {
        let store = store();
        let a = store.add_function("a", "x.c", 1, 2, "").unwrap();
        let b = store.add_function("b", "x.c", 3, 4, "").unwrap();
        store.add_call_edge(a, b).unwrap();
        store.add_condition(b, ConditionKind::Precondition, "p").unwrap();

        assert!(store.delete_function(b).unwrap());
        assert_eq!(store.get_stats().unwrap().total_call_edges, 0);
        assert!(store.conditions(b, ConditionKind::Precondition).unwrap().is_empty());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        {
            let store = IndexStore::open(&path).unwrap();
            let id = store.add_function("f", "x.c", 1, 2, "").unwrap();
            store.update_summary(id, "done").unwrap();
        }
        let store = IndexStore::open(&path).unwrap();
        let id = store.find_function_id("f").unwrap().unwrap();
        assert_eq!(store.function(id).unwrap().unwrap().summary, "done");
    }
}
