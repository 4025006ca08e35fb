use super::{ReportSink, RunArtifacts};
use crate::model::TestOutcome;
use std::path::{Path, PathBuf};

pub fn write_report(path: &Path, artifacts: &RunArtifacts) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(artifacts)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Writes the JSON run report once the summary arrives.
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReportSink {
    fn case(&mut self, _outcome: &TestOutcome) {}

    fn summary(&mut self, artifacts: &RunArtifacts) {
        if let Err(e) = write_report(&self.path, artifacts) {
            tracing::warn!(event = "json_report_failed", path = %self.path.display(), error = %e);
        }
    }
}

/// Fans each event out to several sinks in order.
pub struct MultiSink {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn ReportSink>>) -> Self {
        Self { sinks }
    }
}

impl ReportSink for MultiSink {
    fn case(&mut self, outcome: &TestOutcome) {
        for s in &mut self.sinks {
            s.case(outcome);
        }
    }

    fn summary(&mut self, artifacts: &RunArtifacts) {
        for s in &mut self.sinks {
            s.summary(artifacts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunSummary, TestCase};
    use crate::report::RunStatus;

    #[test]
    fn report_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.json");
        let tc = TestCase {
            index: 1,
            question: "q".into(),
            expected_query: "SELECT 1".into(),
        };
        let outcomes = vec![TestOutcome::execution_failed(&tc, None, "no such table: users")];
        let a = RunArtifacts {
            run_id: 3,
            suite: "demo".into(),
            dataset: "cases.json".into(),
            model: "hashing-256".into(),
            chatbot: "scripted".into(),
            status: RunStatus::Completed,
            started_at: "t0".into(),
            finished_at: "t1".into(),
            summary: RunSummary::from_outcomes(&outcomes),
            outcomes,
        };

        let mut sink = JsonReportSink::new(&path);
        sink.summary(&a);

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: RunArtifacts = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.run_id, 3);
        assert_eq!(back.summary.execution_failed, 1);
        assert_eq!(back.summary.average, None);

        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["outcomes"][0]["status"], "execution_failed");
        assert!(v["outcomes"][0]["score"].is_null());
    }
}
