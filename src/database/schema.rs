pub const SCHEMA: &str = r#"
-- one row per (name, file)
CREATE TABLE IF NOT EXISTS functions (
    function_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    file TEXT NOT NULL,
    start_line INTEGER,
    end_line INTEGER,
    summary TEXT DEFAULT '',
    UNIQUE(name, file)
);

-- preconditions
CREATE TABLE IF NOT EXISTS preconditions (
    function_id INTEGER NOT NULL,
    condition_text TEXT NOT NULL,
    sequence_order INTEGER NOT NULL,
    FOREIGN KEY (function_id) REFERENCES functions(function_id) ON DELETE CASCADE
);

-- postconditions
CREATE TABLE IF NOT EXISTS postconditions (
    function_id INTEGER NOT NULL,
    condition_text TEXT NOT NULL,
    sequence_order INTEGER NOT NULL,
    FOREIGN KEY (function_id) REFERENCES functions(function_id) ON DELETE CASCADE
);

-- caller -> callee
CREATE TABLE IF NOT EXISTS call_edges (
    caller_id INTEGER NOT NULL,
    callee_id INTEGER NOT NULL,
    PRIMARY KEY (caller_id, callee_id),
    FOREIGN KEY (caller_id) REFERENCES functions(function_id) ON DELETE CASCADE,
    FOREIGN KEY (callee_id) REFERENCES functions(function_id) ON DELETE CASCADE
);

-- indexes
CREATE INDEX IF NOT EXISTS idx_func_name ON functions(name);
CREATE INDEX IF NOT EXISTS idx_func_file ON functions(file);
CREATE INDEX IF NOT EXISTS idx_callees ON call_edges(caller_id);
CREATE INDEX IF NOT EXISTS idx_callers ON call_edges(callee_id);
"#;
