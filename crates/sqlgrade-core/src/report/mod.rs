use crate::model::{RunSummary, TestOutcome};
use serde::{Deserialize, Serialize};

pub mod console;
pub mod json;

/// Everything a finished (or aborted) run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub run_id: i64,
    pub suite: String,
    pub dataset: String,
    /// Embedding model id used for scoring.
    pub model: String,
    pub chatbot: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub outcomes: Vec<TestOutcome>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Receives each outcome as soon as its case finishes, then the run summary.
pub trait ReportSink: Send {
    fn case(&mut self, outcome: &TestOutcome);
    fn summary(&mut self, artifacts: &RunArtifacts);
}

/// Sink that discards everything.
pub struct NullSink;

impl ReportSink for NullSink {
    fn case(&mut self, _outcome: &TestOutcome) {}
    fn summary(&mut self, _artifacts: &RunArtifacts) {}
}
