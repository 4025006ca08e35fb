use crate::embeddings::util::{decode_vec_f32, encode_vec_f32};
use crate::errors::PersistenceError;
use crate::model::{AuditKind, AuditMetadata, AuditRecord, RunSummary, TestOutcome};
use anyhow::Context;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run store: runs, per-case results, the embedding cache and audit records,
/// all in one SQLite file.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

pub struct StoreStats {
    pub runs: Option<u64>,
    pub results: Option<u64>,
    pub audit_records: Option<u64>,
    pub last_run_id: Option<i64>,
    pub last_run_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub suite: String,
    pub dataset: String,
    pub started_at: String,
    pub status: String,
    pub summary: Option<RunSummary>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if path.as_os_str() == ":memory:" {
            return Self::memory();
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // runs
    pub fn create_run(
        &self,
        suite: &str,
        dataset: &str,
        config_json: Option<&str>,
    ) -> anyhow::Result<i64> {
        let started_at = now_rfc3339ish();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs(suite, dataset, started_at, status, config_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![suite, dataset, started_at, "running", config_json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(
        &self,
        run_id: i64,
        status: &str,
        summary: &RunSummary,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2, summary_json=?3 WHERE id=?4",
            params![
                status,
                now_rfc3339ish(),
                serde_json::to_string(summary)?,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn insert_outcome(&self, run_id: i64, o: &TestOutcome) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO results(run_id, case_index, question, expected_query, generated_query, status, score, passed, message, audit_id, duration_ms, outcome_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run_id,
                o.index as i64,
                o.question,
                o.expected_query,
                o.generated_query,
                o.status.as_str(),
                o.score,
                o.passed,
                o.message,
                o.audit_id,
                o.duration_ms.map(|v| v as i64),
                serde_json::to_string(o)?
            ],
        )?;
        Ok(())
    }

    pub fn fetch_outcomes(&self, run_id: i64) -> anyhow::Result<Vec<TestOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT outcome_json FROM results WHERE run_id = ?1 ORDER BY case_index ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for r in rows {
            out.push(serde_json::from_str(&r?)?);
        }
        Ok(out)
    }

    pub fn list_runs(&self, limit: u32) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, suite, dataset, started_at, status, summary_json FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let summary: Option<String> = row.get(5)?;
            Ok(RunRow {
                id: row.get(0)?,
                suite: row.get(1)?,
                dataset: row.get(2)?,
                started_at: row.get(3)?,
                status: row.get(4)?,
                summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // embeddings
    pub fn get_embedding(&self, key: &str) -> anyhow::Result<Option<(String, Vec<f32>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT model, vec FROM embeddings WHERE key = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            let model: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let vec = decode_vec_f32(&blob)?;
            Ok(Some((model, vec)))
        } else {
            Ok(None)
        }
    }

    pub fn put_embedding(&self, key: &str, model: &str, vec: &[f32]) -> anyhow::Result<()> {
        let conn = self.conn()?;
        let blob = encode_vec_f32(vec);
        let dims = vec.len() as i64;
        let created_at = now_rfc3339ish();

        conn.execute(
            "INSERT OR REPLACE INTO embeddings (key, model, dims, vec, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, model, dims, blob, created_at],
        )?;
        Ok(())
    }

    // audit records: insert-only
    pub fn audit_insert(&self, records: &[AuditRecord]) -> Result<(), PersistenceError> {
        let mut conn = self
            .conn()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        let tx = conn.transaction().map_err(unavailable)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO audit_records (id, test_name, run_id, kind, dims, vec, document, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(unavailable)?;
            for r in records {
                let created_at = r.created_at.clone().unwrap_or_else(now_rfc3339ish);
                stmt.execute(params![
                    r.id,
                    r.metadata.test_name,
                    r.metadata.run_id,
                    r.metadata.kind.as_str(),
                    r.embedding.len() as i64,
                    encode_vec_f32(&r.embedding),
                    r.document,
                    created_at
                ])
                .map_err(|e| match &e {
                    rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                        PersistenceError::DuplicateId(r.id.clone())
                    }
                    _ => unavailable(e),
                })?;
            }
        }
        tx.commit().map_err(unavailable)?;
        Ok(())
    }

    pub fn audit_by_test_name(&self, test_name: &str) -> anyhow::Result<Vec<AuditRecord>> {
        self.audit_query(
            "SELECT id, test_name, run_id, kind, vec, document, created_at FROM audit_records
             WHERE test_name = ?1 ORDER BY created_at ASC, id ASC",
            Some(test_name),
        )
    }

    pub fn audit_all(&self) -> anyhow::Result<Vec<AuditRecord>> {
        self.audit_query(
            "SELECT id, test_name, run_id, kind, vec, document, created_at FROM audit_records
             ORDER BY created_at ASC, id ASC",
            None,
        )
    }

    fn audit_query(&self, sql: &str, test_name: Option<&str>) -> anyhow::Result<Vec<AuditRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        };
        let rows = match test_name {
            Some(name) => stmt.query_map(params![name], map)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };

        let mut out = Vec::with_capacity(rows.len());
        for (id, test_name, run_id, kind, blob, document, created_at) in rows {
            out.push(AuditRecord {
                id,
                embedding: decode_vec_f32(&blob)?,
                metadata: AuditMetadata {
                    test_name,
                    run_id,
                    kind: AuditKind::parse(&kind),
                },
                document,
                created_at: Some(created_at),
            });
        }
        Ok(out)
    }

    pub fn stats_best_effort(&self) -> anyhow::Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok()
        };
        let runs = count("runs");
        let results = count("results");
        let audit_records = count("audit_records");
        let (last_run_id, last_run_at) = conn
            .query_row(
                "SELECT id, started_at FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
            )
            .map(|(id, at)| (Some(id), Some(at)))
            .unwrap_or((None, None));

        Ok(StoreStats {
            runs,
            results,
            audit_records,
            last_run_id,
            last_run_at,
        })
    }
}

fn unavailable(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Unavailable(e.to_string())
}

pub(crate) fn now_rfc3339ish() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
