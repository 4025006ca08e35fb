use crate::audit::AuditRecorder;
use crate::chatbot::ChatbotAdapter;
use crate::db::guard::ensure_read_only;
use crate::db::QueryExecutor;
use crate::errors::{AdapterError, QueryExecutionError};
use crate::model::{AuditKind, QueryResult, RunSummary, TestCase, TestOutcome};
use crate::report::{ReportSink, RunArtifacts, RunStatus};
use crate::similarity::SimilarityScorer;
use crate::storage::store::{now_rfc3339ish, Store};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Serialize)]
pub struct RunPolicy {
    pub min_score: f64,
    /// Run the read-only guard over expected queries too. Generated queries
    /// are always guarded.
    pub guard_expected: bool,
    pub audit_generated: bool,
    pub db_timeout: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            min_score: 0.80,
            guard_expected: true,
            audit_generated: false,
            db_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    pub store: Store,
    pub executor: Arc<dyn QueryExecutor>,
    pub adapter: ChatbotAdapter,
    pub scorer: SimilarityScorer,
    pub audit: Option<AuditRecorder>,
    pub policy: RunPolicy,
}

impl Runner {
    /// Processes every case in dataset order, one at a time. Returns an error
    /// only when the chatbot is unreachable; the sink still gets the summary
    /// of the cases processed so far.
    pub async fn run_suite(
        &self,
        suite: &str,
        dataset: &str,
        cases: &[TestCase],
        sink: &mut dyn ReportSink,
    ) -> anyhow::Result<RunArtifacts> {
        let config_json = serde_json::json!({
            "policy": &self.policy,
            "model": self.scorer.model_id(),
            "chatbot": self.adapter.provider_name(),
            "database": self.executor.backend_name(),
            "audit": self.audit.as_ref().map(|a| a.backend_name()),
        })
        .to_string();
        let run_id = self.store.create_run(suite, dataset, Some(&config_json))?;
        let started_at = now_rfc3339ish();
        tracing::info!(event = "run_started", run_id, suite, cases = cases.len());

        let mut outcomes = Vec::with_capacity(cases.len());
        let mut fatal: Option<(usize, AdapterError)> = None;

        for tc in cases {
            let this = self.clone();
            let task_tc = tc.clone();
            let h = tokio::spawn(async move { this.run_case(&task_tc, run_id).await });

            let outcome = match h.await {
                Ok(Ok(o)) => o,
                Ok(Err(e)) => {
                    tracing::error!(event = "run_aborted", run_id, index = tc.index, error = %e);
                    fatal = Some((tc.index, e));
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        event = "case_crashed",
                        index = tc.index,
                        question = %tc.question,
                        error = %e
                    );
                    TestOutcome::execution_failed(tc, None, format!("internal error: {}", e))
                }
            };

            if let Err(e) = self.store.insert_outcome(run_id, &outcome) {
                tracing::warn!(event = "result_persist_failed", run_id, index = tc.index, error = %e);
            }
            sink.case(&outcome);
            outcomes.push(outcome);
        }

        let summary = RunSummary::from_outcomes(&outcomes);
        let status = if fatal.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        if let Err(e) = self.store.finalize_run(run_id, status.as_str(), &summary) {
            tracing::warn!(event = "run_finalize_failed", run_id, error = %e);
        }
        tracing::info!(
            event = "run_finished",
            run_id,
            status = status.as_str(),
            scored = summary.scored,
            average = ?summary.average
        );

        let artifacts = RunArtifacts {
            run_id,
            suite: suite.to_string(),
            dataset: dataset.to_string(),
            model: self.scorer.model_id(),
            chatbot: self.adapter.provider_name().to_string(),
            status,
            started_at,
            finished_at: now_rfc3339ish(),
            outcomes,
            summary,
        };
        sink.summary(&artifacts);

        match fatal {
            Some((index, e)) => Err(anyhow::Error::new(e)
                .context(format!("run #{} aborted at test case {}", run_id, index))),
            None => Ok(artifacts),
        }
    }

    /// One case through the state machine. `Err` is reserved for failures
    /// that must stop the whole run.
    async fn run_case(&self, tc: &TestCase, run_id: i64) -> Result<TestOutcome, AdapterError> {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let expected = match self.run_query(&tc.expected_query, self.policy.guard_expected).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event = "expected_query_failed", index = tc.index, error = %e);
                return Ok(TestOutcome::execution_failed(
                    tc,
                    None,
                    format!("expected query failed: {}", e),
                )
                .with_duration_ms(elapsed(start)));
            }
        };
        let expected_text = self.scorer.canonical_text(&expected);
        tracing::debug!(event = "expected_executed", index = tc.index, rows = expected.row_count());

        let audit_id = self
            .audit_result(&tc.question, run_id, AuditKind::Expected, &expected_text)
            .await;

        let generated_query = match self.adapter.generate(&tc.question).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                return Ok(TestOutcome::generation_failed(tc, "no query in chatbot payload")
                    .with_audit_id(audit_id)
                    .with_rows(Some(expected.row_count()), None)
                    .with_duration_ms(elapsed(start)));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(event = "chatbot_failed", index = tc.index, error = %e);
                return Ok(TestOutcome::generation_failed(tc, e.to_string())
                    .with_audit_id(audit_id)
                    .with_rows(Some(expected.row_count()), None)
                    .with_duration_ms(elapsed(start)));
            }
        };

        let generated = match self.run_query(&generated_query, true).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event = "generated_query_failed", index = tc.index, error = %e);
                return Ok(TestOutcome::execution_failed(
                    tc,
                    Some(generated_query),
                    format!("generated query failed: {}", e),
                )
                .with_audit_id(audit_id)
                .with_rows(Some(expected.row_count()), None)
                .with_duration_ms(elapsed(start)));
            }
        };

        if self.policy.audit_generated {
            let text = self.scorer.canonical_text(&generated);
            self.audit_result(&tc.question, run_id, AuditKind::Generated, &text)
                .await;
        }

        let rows = (Some(expected.row_count()), Some(generated.row_count()));
        let outcome = match self.scorer.score(&expected, &generated).await {
            Ok(sim) => TestOutcome::scored(tc, generated_query, sim, self.policy.min_score),
            Err(e) => {
                tracing::warn!(event = "scoring_failed", index = tc.index, error = %e);
                TestOutcome::execution_failed(tc, Some(generated_query), format!("scoring failed: {}", e))
            }
        };
        Ok(outcome
            .with_audit_id(audit_id)
            .with_rows(rows.0, rows.1)
            .with_duration_ms(elapsed(start)))
    }

    async fn run_query(&self, sql: &str, guard: bool) -> Result<QueryResult, QueryExecutionError> {
        if guard {
            ensure_read_only(sql)?;
        }
        match timeout(self.policy.db_timeout, self.executor.execute(sql)).await {
            Ok(res) => res,
            Err(_) => {
                self.executor.cancel();
                Err(QueryExecutionError::Timeout(self.policy.db_timeout))
            }
        }
    }

    /// Audit failures are logged and otherwise ignored.
    async fn audit_result(
        &self,
        test_name: &str,
        run_id: i64,
        kind: AuditKind,
        document: &str,
    ) -> Option<String> {
        let recorder = self.audit.as_ref()?;
        match recorder.record(test_name, Some(run_id), kind, document).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    event = "audit_failed",
                    test_name,
                    kind = kind.as_str(),
                    error = %e
                );
                None
            }
        }
    }
}
