use super::{ReportSink, RunArtifacts, RunStatus};
use crate::model::{OutcomeStatus, RunSummary, TestOutcome};
use std::io::Write;

/// Human-readable report, one block per case, written to stderr by default.
pub struct ConsoleReporter<W: Write + Send> {
    out: W,
}

impl ConsoleReporter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            out: std::io::stderr(),
        }
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_case(&mut self, o: &TestOutcome) -> std::io::Result<()> {
        let w = &mut self.out;
        writeln!(w, "Test Case {}:", o.index)?;
        writeln!(w, "  Question: {}", o.question)?;
        writeln!(w, "  Expected Query: {}", o.expected_query)?;
        writeln!(
            w,
            "  Generated Query: {}",
            o.generated_query.as_deref().unwrap_or("(none)")
        )?;
        if let (Some(e), Some(g)) = (o.expected_rows, o.generated_rows) {
            writeln!(w, "  Rows: expected {}, generated {}", e, g)?;
        }

        match o.status {
            OutcomeStatus::Scored => {
                let score = o.score.unwrap_or(0.0);
                let icon = if o.passed == Some(true) { "✅" } else { "❌" };
                writeln!(w, "  Similarity Score: {:.2} {}", score, icon)?;
                if !o.flags.is_empty() || o.passed != Some(true) {
                    writeln!(w, "    {}", o.message)?;
                }
                if o.query_exact_match {
                    writeln!(w, "    (query text matches expected)")?;
                }
            }
            OutcomeStatus::GenerationFailed => {
                writeln!(w, "  ❌ No valid SQL query generated. ({})", o.message)?;
            }
            OutcomeStatus::ExecutionFailed => {
                writeln!(w, "  💥 Query execution error: {}", o.message)?;
            }
        }
        if let Some(id) = &o.audit_id {
            writeln!(w, "  Audit ID: {}", id)?;
        }
        writeln!(w, "{}", "-".repeat(60))
    }

    fn write_summary(&mut self, a: &RunArtifacts) -> std::io::Result<()> {
        let s = &a.summary;
        let w = &mut self.out;
        writeln!(w, "\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        if a.status == RunStatus::Aborted {
            writeln!(w, "⚠️  Run #{} aborted; summary covers processed cases only", a.run_id)?;
        }
        writeln!(
            w,
            "Summary: {} cases, {} scored ({} passed), {} generation failed, {} execution failed",
            s.total, s.scored, s.passed, s.generation_failed, s.execution_failed
        )?;
        writeln!(w, "{}", grand_score_line(s))?;
        if let Some(line) = accuracy_line(s) {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }
}

/// The closing line of every report.
pub fn grand_score_line(s: &RunSummary) -> String {
    match s.average {
        Some(avg) => format!("Grand Global Score (Average Similarity): {:.2}", avg),
        None => "No similarity scores to calculate.".to_string(),
    }
}

impl<W: Write + Send> ReportSink for ConsoleReporter<W> {
    fn case(&mut self, outcome: &TestOutcome) {
        if let Err(e) = self.write_case(outcome) {
            tracing::warn!(event = "console_write_failed", error = %e);
        }
    }

    fn summary(&mut self, artifacts: &RunArtifacts) {
        if let Err(e) = self.write_summary(artifacts) {
            tracing::warn!(event = "console_write_failed", error = %e);
        }
    }
}

/// Share of cases whose generated query text equals the expected one. A
/// secondary signal only; the similarity score is the verdict.
pub fn accuracy_line(s: &RunSummary) -> Option<String> {
    let pct = s.exact_match_rate()? * 100.0;
    Some(format!(
        "Accuracy (exact query match): {:.2}% ({}/{} correct cases)",
        pct, s.exact_matches, s.total
    ))
}
