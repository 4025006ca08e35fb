use crate::embeddings::util::cosine_similarity;
use crate::embeddings::EmbeddingService;
use crate::errors::PersistenceError;
use crate::model::{AuditKind, AuditMetadata, AuditRecord};
use crate::storage::Store;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Vector store for audit snapshots. Records are written once and never
/// updated or deleted.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[AuditMetadata],
        documents: Option<&[String]>,
    ) -> Result<(), PersistenceError>;

    async fn get_by_test_name(&self, test_name: &str) -> Result<Vec<AuditRecord>, PersistenceError>;

    /// Top `k` records by cosine similarity to `embedding`, best first.
    async fn nearest(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(AuditRecord, f64)>, PersistenceError>;

    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl AuditStore for Store {
    async fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[AuditMetadata],
        documents: Option<&[String]>,
    ) -> Result<(), PersistenceError> {
        if ids.len() != embeddings.len() || ids.len() != metadatas.len() {
            return Err(PersistenceError::InvalidBatch(format!(
                "{} ids, {} embeddings, {} metadatas",
                ids.len(),
                embeddings.len(),
                metadatas.len()
            )));
        }
        if let Some(docs) = documents {
            if docs.len() != ids.len() {
                return Err(PersistenceError::InvalidBatch(format!(
                    "{} ids, {} documents",
                    ids.len(),
                    docs.len()
                )));
            }
        }

        let records: Vec<AuditRecord> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| AuditRecord {
                id: id.clone(),
                embedding: embeddings[i].clone(),
                metadata: metadatas[i].clone(),
                document: documents.map(|d| d[i].clone()),
                created_at: None,
            })
            .collect();

        let store = self.clone();
        tokio::task::spawn_blocking(move || store.audit_insert(&records))
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
    }

    async fn get_by_test_name(&self, test_name: &str) -> Result<Vec<AuditRecord>, PersistenceError> {
        self.audit_by_test_name(test_name)
            .map_err(|e| PersistenceError::Unavailable(format!("{:#}", e)))
    }

    async fn nearest(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(AuditRecord, f64)>, PersistenceError> {
        let all = self
            .audit_all()
            .map_err(|e| PersistenceError::Unavailable(format!("{:#}", e)))?;
        Ok(rank_by_similarity(all, embedding, k))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Records whose dims differ from the query, or that have zero norm, are
/// skipped rather than ranked.
pub fn rank_by_similarity(
    records: Vec<AuditRecord>,
    embedding: &[f32],
    k: usize,
) -> Vec<(AuditRecord, f64)> {
    let mut scored: Vec<(AuditRecord, f64)> = records
        .into_iter()
        .filter_map(|r| match cosine_similarity(&r.embedding, embedding) {
            Ok(Some(s)) => Some((r, s)),
            _ => None,
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

static AUDIT_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{test_name}_{unix_millis}_{pid}_{seq}`. The counter separates ids minted
/// in the same millisecond by one process, the pid separates processes
/// sharing a store.
pub fn next_audit_id(test_name: &str) -> String {
    let seq = AUDIT_SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = chrono::Utc::now().timestamp_millis();
    format!(
        "{}_{}_{}_{}",
        sanitize(test_name),
        millis,
        std::process::id(),
        seq
    )
}

fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let s = s.trim_matches('_');
    if s.is_empty() {
        "case".to_string()
    } else {
        s.chars().take(64).collect()
    }
}

/// Embeds a case's canonical result text and writes it to the audit store.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    embeddings: Arc<EmbeddingService>,
    timeout: Duration,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>, embeddings: Arc<EmbeddingService>) -> Self {
        Self {
            store,
            embeddings,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Returns the id of the written record. On `PersistenceError::Timeout`
    /// the store call is abandoned, not rolled back: a blocking write that is
    /// already running can still land under the id carried by the error.
    pub async fn record(
        &self,
        test_name: &str,
        run_id: Option<i64>,
        kind: AuditKind,
        document: &str,
    ) -> Result<String, PersistenceError> {
        let vectors = self
            .embeddings
            .embed_texts(&[document.to_string()])
            .await
            .map_err(|e| PersistenceError::Embedding(e.to_string()))?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::Embedding("embedder returned no vector".into()))?;

        let id = next_audit_id(test_name);
        let metadata = AuditMetadata {
            test_name: test_name.to_string(),
            run_id,
            kind,
        };

        let documents = [document.to_string()];
        let write = self.store.add(
            std::slice::from_ref(&id),
            std::slice::from_ref(&embedding),
            std::slice::from_ref(&metadata),
            Some(&documents[..]),
        );
        match timeout(self.timeout, write).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(PersistenceError::Timeout {
                    id,
                    after: self.timeout,
                })
            }
        }

        tracing::debug!(event = "audit_recorded", id = %id, kind = kind.as_str());
        Ok(id)
    }
}
