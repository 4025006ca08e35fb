use async_trait::async_trait;
use rusqlite::Connection;
use sqlgrade_core::audit::{AuditRecorder, AuditStore};
use sqlgrade_core::chatbot::scripted::ScriptedChatbot;
use sqlgrade_core::chatbot::{Chatbot, ChatbotAdapter};
use sqlgrade_core::db::sqlite::SqliteExecutor;
use sqlgrade_core::db::QueryExecutor;
use sqlgrade_core::embeddings::hashing::HashingEmbedder;
use sqlgrade_core::embeddings::{Embedder, EmbeddingService};
use sqlgrade_core::engine::{RunPolicy, Runner};
use sqlgrade_core::errors::{AdapterError, PersistenceError};
use sqlgrade_core::model::{AuditMetadata, AuditRecord, OutcomeStatus, TestCase, TestOutcome};
use sqlgrade_core::report::{ReportSink, RunArtifacts, RunStatus};
use sqlgrade_core::similarity::SimilarityScorer;
use sqlgrade_core::storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Collect {
    cases: Vec<TestOutcome>,
    summary: Option<RunArtifacts>,
}

impl ReportSink for Collect {
    fn case(&mut self, outcome: &TestOutcome) {
        self.cases.push(outcome.clone());
    }
    fn summary(&mut self, artifacts: &RunArtifacts) {
        self.summary = Some(artifacts.clone());
    }
}

fn users_db() -> SqliteExecutor {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO users (name) VALUES ('ada'), ('bob'), ('cy'), ('dee'), ('eve');",
    )
    .unwrap();
    SqliteExecutor::from_connection(conn).unwrap()
}

fn store() -> Store {
    let s = Store::memory().unwrap();
    s.init_schema().unwrap();
    s
}

fn case(index: usize, question: &str, expected: &str) -> TestCase {
    TestCase {
        index,
        question: question.into(),
        expected_query: expected.into(),
    }
}

fn scripted(pairs: &[(&str, &str)]) -> Arc<dyn Chatbot> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(q, sql)| {
            (
                q.to_string(),
                serde_json::json!({ "captured_query": sql }).to_string(),
            )
        })
        .collect();
    Arc::new(ScriptedChatbot::new(map))
}

fn runner_with(
    executor: Arc<dyn QueryExecutor>,
    chatbot: Arc<dyn Chatbot>,
    embedder: Arc<dyn Embedder>,
) -> Runner {
    let store = store();
    let embeddings = Arc::new(
        EmbeddingService::new(embedder, Duration::from_secs(5)).with_cache(store.clone(), false),
    );
    let audit = AuditRecorder::new(Arc::new(store.clone()), embeddings.clone());
    Runner {
        store,
        executor,
        adapter: ChatbotAdapter::new(chatbot),
        scorer: SimilarityScorer::new(embeddings, false),
        audit: Some(audit),
        policy: RunPolicy::default(),
    }
}

/// Fixed vectors per canonical result text.
struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| match t.as_str() {
                "[[1]]" => Ok(vec![1.0, 0.0]),
                "[[2]]" => Ok(vec![0.8, 0.6]),
                "[[3]]" => Ok(vec![0.6, 0.8]),
                other => anyhow::bail!("no vector for {}", other),
            })
            .collect()
    }
    fn model_id(&self) -> String {
        "static".into()
    }
}

#[tokio::test]
async fn identical_generated_query_scores_one() {
    let runner = runner_with(
        Arc::new(users_db()),
        scripted(&[("How many users?", "SELECT COUNT(*) FROM users")]),
        Arc::new(HashingEmbedder::default()),
    );
    let mut sink = Collect::default();
    let cases = [case(1, "How many users?", "SELECT COUNT(*) FROM users")];

    let a = runner.run_suite("demo", "mem", &cases, &mut sink).await.unwrap();

    let o = &a.outcomes[0];
    assert_eq!(o.status, OutcomeStatus::Scored);
    assert!(o.score.unwrap() >= 0.999);
    assert_eq!(o.passed, Some(true));
    assert_eq!(o.expected_rows, Some(1));
    assert!(o.audit_id.is_some());
    assert!((a.summary.grand_score() - 1.0).abs() < 1e-3);
    assert_eq!(sink.cases.len(), 1);
    assert_eq!(sink.summary.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn missing_query_is_generation_failed_and_excluded_from_average() {
    let runner = runner_with(
        Arc::new(users_db()),
        scripted(&[("How many users?", "SELECT COUNT(*) FROM users")]),
        Arc::new(HashingEmbedder::default()),
    );
    let cases = [
        case(1, "How many users?", "SELECT COUNT(*) FROM users"),
        case(2, "Who signed up last?", "SELECT name FROM users ORDER BY id DESC LIMIT 1"),
    ];

    let a = runner
        .run_suite("demo", "mem", &cases, &mut Collect::default())
        .await
        .unwrap();

    assert_eq!(a.outcomes[1].status, OutcomeStatus::GenerationFailed);
    assert_eq!(a.outcomes[1].score, None);
    assert_eq!(a.summary.scored, 1);
    assert_eq!(a.summary.generation_failed, 1);
    assert!(a.summary.average.unwrap() >= 0.999);
}

#[tokio::test]
async fn failing_expected_query_does_not_stop_the_run() {
    let runner = runner_with(
        Arc::new(users_db()),
        scripted(&[("How many users?", "SELECT COUNT(*) FROM users")]),
        Arc::new(HashingEmbedder::default()),
    );
    let cases = [
        case(1, "How many orders?", "SELECT COUNT(*) FROM orders"),
        case(2, "How many users?", "SELECT COUNT(*) FROM users"),
    ];
    let mut sink = Collect::default();

    let a = runner.run_suite("demo", "mem", &cases, &mut sink).await.unwrap();

    assert_eq!(a.outcomes[0].status, OutcomeStatus::ExecutionFailed);
    assert_eq!(a.outcomes[0].score, None);
    assert!(a.outcomes[0].message.contains("no such table"), "{}", a.outcomes[0].message);
    assert_eq!(a.outcomes[1].status, OutcomeStatus::Scored);
    assert!(sink.summary.is_some());
}

#[tokio::test]
async fn average_covers_scored_cases_only() {
    let runner = runner_with(
        Arc::new(SqliteExecutor::memory().unwrap()),
        scripted(&[("a", "SELECT 2"), ("b", "SELECT 3")]),
        Arc::new(StaticEmbedder),
    );
    let cases = [
        case(1, "a", "SELECT 1"),
        case(2, "b", "SELECT 1"),
        case(3, "c", "SELECT 1"),
    ];

    let a = runner
        .run_suite("demo", "mem", &cases, &mut Collect::default())
        .await
        .unwrap();

    assert!((a.outcomes[0].score.unwrap() - 0.8).abs() < 1e-6);
    assert!((a.outcomes[1].score.unwrap() - 0.6).abs() < 1e-6);
    assert_eq!(a.outcomes[0].passed, Some(true));
    assert_eq!(a.outcomes[1].passed, Some(false));
    assert_eq!(a.outcomes[2].status, OutcomeStatus::GenerationFailed);
    assert!((a.summary.average.unwrap() - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn nothing_scored_reports_no_average() {
    let runner = runner_with(
        Arc::new(users_db()),
        scripted(&[]),
        Arc::new(HashingEmbedder::default()),
    );
    let a = runner
        .run_suite(
            "demo",
            "mem",
            &[case(1, "q", "SELECT 1")],
            &mut Collect::default(),
        )
        .await
        .unwrap();
    assert_eq!(a.summary.scored, 0);
    assert_eq!(a.summary.average, None);
    assert_eq!(a.summary.grand_score(), 0.0);
}

struct BrokenAuditStore;

#[async_trait]
impl AuditStore for BrokenAuditStore {
    async fn add(
        &self,
        _ids: &[String],
        _embeddings: &[Vec<f32>],
        _metadatas: &[AuditMetadata],
        _documents: Option<&[String]>,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unavailable("disk on fire".into()))
    }
    async fn get_by_test_name(&self, _name: &str) -> Result<Vec<AuditRecord>, PersistenceError> {
        Ok(vec![])
    }
    async fn nearest(
        &self,
        _embedding: &[f32],
        _k: usize,
    ) -> Result<Vec<(AuditRecord, f64)>, PersistenceError> {
        Ok(vec![])
    }
    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn audit_failures_do_not_change_outcomes() {
    let chatbot = scripted(&[
        ("How many users?", "SELECT COUNT(*) FROM users"),
        ("First user?", "SELECT name FROM users WHERE id = 2"),
    ]);
    let cases = [
        case(1, "How many users?", "SELECT COUNT(*) FROM users"),
        case(2, "First user?", "SELECT name FROM users WHERE id = 1"),
    ];

    let healthy = runner_with(Arc::new(users_db()), chatbot.clone(), Arc::new(HashingEmbedder::default()));
    let mut broken = healthy.clone();
    broken.audit = Some(AuditRecorder::new(
        Arc::new(BrokenAuditStore),
        Arc::new(EmbeddingService::new(
            Arc::new(HashingEmbedder::default()),
            Duration::from_secs(5),
        )),
    ));

    let good = healthy.run_suite("demo", "mem", &cases, &mut Collect::default()).await.unwrap();
    let bad = broken.run_suite("demo", "mem", &cases, &mut Collect::default()).await.unwrap();

    assert_eq!(bad.outcomes.len(), 2);
    for (g, b) in good.outcomes.iter().zip(bad.outcomes.iter()) {
        assert_eq!(g.status, b.status);
        assert_eq!(g.score, b.score);
        assert!(g.audit_id.is_some());
        assert!(b.audit_id.is_none());
    }
}

#[tokio::test]
async fn expected_results_are_audited_per_case() {
    let runner = runner_with(
        Arc::new(users_db()),
        scripted(&[]),
        Arc::new(HashingEmbedder::default()),
    );
    let mut runner = runner;
    runner.policy.audit_generated = true;
    let cases = [case(1, "How many users?", "SELECT COUNT(*) FROM users")];

    let a = runner.run_suite("demo", "mem", &cases, &mut Collect::default()).await.unwrap();

    let records = runner.store.get_by_test_name("How many users?").await.unwrap();
    assert_eq!(records.len(), 1, "generation failed, so only the expected result is audited");
    assert_eq!(records[0].metadata.run_id, Some(a.run_id));
    assert_eq!(records[0].document.as_deref(), Some("[[5]]"));
}

struct Unreachable;

#[async_trait]
impl Chatbot for Unreachable {
    async fn ask(&self, _prompt: &str) -> Result<String, AdapterError> {
        Err(AdapterError::Unreachable("connection refused".into()))
    }
    fn provider_name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn unreachable_chatbot_aborts_with_partial_summary() {
    let runner = runner_with(
        Arc::new(users_db()),
        Arc::new(Unreachable),
        Arc::new(HashingEmbedder::default()),
    );
    let cases = [
        case(1, "broken", "SELECT * FROM nope"),
        case(2, "How many users?", "SELECT COUNT(*) FROM users"),
        case(3, "never asked", "SELECT 1"),
    ];
    let mut sink = Collect::default();

    let err = runner.run_suite("demo", "mem", &cases, &mut sink).await.unwrap_err();
    assert!(format!("{:#}", err).contains("connection refused"));

    let summary = sink.summary.unwrap();
    assert_eq!(summary.status, RunStatus::Aborted);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.summary.execution_failed, 1);

    let runs = runner.store.list_runs(1).unwrap();
    assert_eq!(runs[0].status, "aborted");
}

#[tokio::test]
async fn mutating_generated_sql_is_rejected_and_leaves_db_untouched() {
    let db = Arc::new(users_db());
    let runner = runner_with(
        db.clone(),
        scripted(&[
            ("Remove everyone", "DELETE FROM users"),
            ("Sneaky", "SELECT 1; DROP TABLE users"),
        ]),
        Arc::new(HashingEmbedder::default()),
    );
    let cases = [
        case(1, "Remove everyone", "SELECT COUNT(*) FROM users"),
        case(2, "Sneaky", "SELECT 1"),
    ];

    let a = runner
        .run_suite("demo", "mem", &cases, &mut Collect::default())
        .await
        .unwrap();

    for o in &a.outcomes {
        assert_eq!(o.status, OutcomeStatus::ExecutionFailed);
        assert!(o.message.contains("rejected"), "{}", o.message);
        assert!(o.generated_query.is_some());
    }
    let still = db.execute("SELECT COUNT(*) FROM users").await.unwrap();
    assert_eq!(still.canonical_text(false), "[[5]]");
}
