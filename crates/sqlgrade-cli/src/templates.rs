pub const SAMPLE_DATASET: &str = r#"[
  {
    "question": "How many users?",
    "expected_query": "SELECT COUNT(*) FROM users"
  },
  {
    "question": "Which users are older than 30?",
    "expected_query": "SELECT name FROM users WHERE age > 30 ORDER BY name"
  },
  {
    "question": "What is the average order total?",
    "expected_query": "SELECT AVG(total) FROM orders"
  }
]
"#;

pub const SAMPLE_REPLAY: &str = r#"{"question": "How many users?", "captured_query": "SELECT COUNT(*) FROM users"}
{"question": "Which users are older than 30?", "captured_query": "SELECT name FROM users ORDER BY name"}
{"question": "What is the average order total?", "response": "{\"captured_queries\": \"SELECT SUM(total) / COUNT(*) FROM orders\"}"}
"#;

pub const DEMO_DB_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  age INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
  id INTEGER PRIMARY KEY,
  user_id INTEGER NOT NULL REFERENCES users(id),
  total REAL NOT NULL
);
INSERT INTO users (id, name, age) VALUES
  (1, 'ada', 36), (2, 'bob', 28), (3, 'cy', 41), (4, 'dee', 19), (5, 'eve', 33);
INSERT INTO orders (user_id, total) VALUES
  (1, 20.0), (1, 35.5), (3, 12.25), (5, 80.0);
"#;

pub const GITIGNORE: &str = "/.sqlgrade/\n*.db-shm\n*.db-wal\nreport.json\n";
