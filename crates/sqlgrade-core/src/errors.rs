use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Problems loading the labeled dataset. Always fatal: the run aborts before
/// the first case is processed.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dataset {path}: {message}")]
    Parse { path: String, message: String },
    #[error("dataset {path}: entry {index} is missing required field '{field}'")]
    MissingField {
        path: String,
        index: usize,
        field: &'static str,
    },
    #[error("dataset {path} has no test cases")]
    Empty { path: String },
}

/// Transport-level failures talking to the chatbot. Malformed payloads are
/// never reported through this type.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("chatbot unreachable: {0}")]
    Unreachable(String),
    #[error("chatbot request timed out after {0:?}")]
    Timeout(Duration),
    #[error("chatbot returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chatbot transport error: {0}")]
    Transport(String),
}

impl AdapterError {
    /// Only an unreachable chatbot aborts the run; a slow or failing request
    /// only costs the current case.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Unreachable(_))
    }
}

#[derive(Debug, Error)]
pub enum QueryExecutionError {
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("database connection unavailable: {0}")]
    Connection(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "mysql")]
    #[error("mysql error: {0}")]
    MySql(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
    #[error("audit batch is malformed: {0}")]
    InvalidBatch(String),
    #[error("audit record id '{0}' already exists")]
    DuplicateId(String),
    #[error("failed to embed audit payload: {0}")]
    Embedding(String),
    /// The write may still land after this is reported.
    #[error("audit write of '{id}' timed out after {after:?}")]
    Timeout { id: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedder returned {got} vectors for {expected} inputs")]
    VectorCount { expected: usize, got: usize },
    #[error("embedding dims mismatch (a={a}, b={b})")]
    DimensionMismatch { a: usize, b: usize },
}
