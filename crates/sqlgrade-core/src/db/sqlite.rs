use super::QueryExecutor;
use crate::errors::QueryExecutionError;
use crate::model::{QueryResult, ScalarValue};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed executor. Every statement runs inside a transaction that is
/// rolled back afterwards, and the connection is switched to `query_only`.
#[derive(Clone)]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteExecutor {
    pub fn open(path: &Path) -> Result<Self, QueryExecutionError> {
        if path.as_os_str() == ":memory:" {
            return Self::memory();
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::from_connection(conn)
    }

    pub fn memory() -> Result<Self, QueryExecutionError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection (e.g. one seeded by a test). The
    /// connection is made query-only from here on.
    pub fn from_connection(conn: Connection) -> Result<Self, QueryExecutionError> {
        conn.pragma_update(None, "query_only", true)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }
}

/// Creates (or extends) a SQLite file by running a DDL/DML script. Used to
/// set up demo and fixture databases; the executor itself never writes.
pub fn seed_database(path: &Path, script: &str) -> anyhow::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(script)?;
    Ok(())
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryExecutionError> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| QueryExecutionError::Connection(e.to_string()))?;
            run_rolled_back(&conn, &sql)
        })
        .await
        .map_err(|e| QueryExecutionError::Connection(format!("query task failed: {}", e)))?
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn cancel(&self) {
        self.interrupt.interrupt();
    }
}

fn run_rolled_back(conn: &Connection, sql: &str) -> Result<QueryResult, QueryExecutionError> {
    let tx = conn.unchecked_transaction()?;
    let result = fetch_all(&tx, sql);
    tx.rollback()?;
    result
}

fn fetch_all(conn: &Connection, sql: &str) -> Result<QueryResult, QueryExecutionError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(scalar_from_ref(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(QueryResult::new(columns, out))
}

fn scalar_from_ref(v: ValueRef<'_>) -> ScalarValue {
    match v {
        ValueRef::Null => ScalarValue::Null,
        ValueRef::Integer(i) => ScalarValue::Integer(i),
        ValueRef::Real(f) => ScalarValue::Real(f),
        ValueRef::Text(t) => ScalarValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => ScalarValue::Bytes(b.to_vec()),
    }
}
