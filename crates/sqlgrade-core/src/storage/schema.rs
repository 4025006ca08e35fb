pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  suite TEXT NOT NULL,
  dataset TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  config_json TEXT,
  summary_json TEXT
);

CREATE TABLE IF NOT EXISTS results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  case_index INTEGER NOT NULL,
  question TEXT NOT NULL,
  expected_query TEXT NOT NULL,
  generated_query TEXT,
  status TEXT NOT NULL,
  score REAL,
  passed INTEGER,
  message TEXT,
  audit_id TEXT,
  duration_ms INTEGER,
  outcome_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
  key TEXT PRIMARY KEY,
  model TEXT NOT NULL,
  dims INTEGER NOT NULL,
  vec BLOB NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_records (
  id TEXT PRIMARY KEY,
  test_name TEXT NOT NULL,
  run_id INTEGER,
  kind TEXT NOT NULL,
  dims INTEGER NOT NULL,
  vec BLOB NOT NULL,
  document TEXT,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
CREATE INDEX IF NOT EXISTS idx_audit_test_name ON audit_records(test_name);
"#;
