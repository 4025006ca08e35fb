use serde::{Deserialize, Serialize};

/// One labeled question. `index` is the 1-based position in the dataset and
/// is the only identifier guaranteed to be unique within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub index: usize,
    pub question: String,
    pub expected_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Stable JSON form used for canonical serialization. Bytes become
    /// lowercase hex, non-finite reals become their string spelling.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Null => serde_json::Value::Null,
            ScalarValue::Bool(b) => serde_json::Value::Bool(*b),
            ScalarValue::Integer(i) => serde_json::Value::from(*i),
            ScalarValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            ScalarValue::Text(s) => serde_json::Value::String(s.clone()),
            ScalarValue::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        }
    }

    pub fn display(&self) -> String {
        match self {
            ScalarValue::Null => "NULL".into(),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Real(f) => f.to_string(),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Bytes(b) => format!("x'{}'", hex::encode(b)),
        }
    }
}

/// Tabular result of one query. Column names are kept for display only and
/// never take part in scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn from_rows(rows: Vec<Vec<ScalarValue>>) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Deterministic text for embedding: a compact JSON array of row arrays.
    /// Equal data always yields byte-identical text.
    pub fn canonical_text(&self, sort_rows: bool) -> String {
        let mut rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                serde_json::Value::Array(row.iter().map(|v| v.to_canonical_json()).collect())
                    .to_string()
            })
            .collect();
        if sort_rows {
            rows.sort();
        }
        format!("[{}]", rows.join(","))
    }

    /// Short human-readable preview, e.g. `[(5,)]`.
    pub fn preview(&self, max_rows: usize) -> String {
        let mut parts: Vec<String> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                let cells: Vec<String> = row.iter().map(|v| v.display()).collect();
                if cells.len() == 1 {
                    format!("({},)", cells[0])
                } else {
                    format!("({})", cells.join(", "))
                }
            })
            .collect();
        if self.rows.len() > max_rows {
            parts.push(format!("... {} more", self.rows.len() - max_rows));
        }
        format!("[{}]", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Scored,
    GenerationFailed,
    ExecutionFailed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Scored => "scored",
            OutcomeStatus::GenerationFailed => "generation_failed",
            OutcomeStatus::ExecutionFailed => "execution_failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scored" => OutcomeStatus::Scored,
            "generation_failed" => OutcomeStatus::GenerationFailed,
            _ => OutcomeStatus::ExecutionFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFlag {
    /// One of the embeddings had zero norm; the score was forced to 0.
    DegenerateEmbedding,
    /// Raw cosine was below zero; the score was clamped to 0.
    NegativeSimilarity,
}

/// Similarity of two result sets as produced by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub score: f64,
    pub raw_cosine: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<ScoreFlag>,
    pub model: String,
    pub dims: usize,
}

/// Final record for one test case. Build it through the `scored`,
/// `generation_failed` and `execution_failed` constructors so that `score`
/// is present exactly when the case was scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub index: usize,
    pub question: String,
    pub expected_query: String,
    pub generated_query: Option<String>,
    pub status: OutcomeStatus,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub query_exact_match: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<ScoreFlag>,
    pub message: String,
    #[serde(default)]
    pub audit_id: Option<String>,
    #[serde(default)]
    pub expected_rows: Option<usize>,
    #[serde(default)]
    pub generated_rows: Option<usize>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl TestOutcome {
    fn base(tc: &TestCase, status: OutcomeStatus, message: String) -> Self {
        Self {
            index: tc.index,
            question: tc.question.clone(),
            expected_query: tc.expected_query.clone(),
            generated_query: None,
            status,
            score: None,
            passed: None,
            query_exact_match: false,
            flags: Vec::new(),
            message,
            audit_id: None,
            expected_rows: None,
            generated_rows: None,
            duration_ms: None,
        }
    }

    pub fn scored(tc: &TestCase, generated_query: String, sim: Similarity, min_score: f64) -> Self {
        let mut o = Self::base(tc, OutcomeStatus::Scored, "ok".into());
        o.query_exact_match = crate::similarity::queries_match(&tc.expected_query, &generated_query);
        o.generated_query = Some(generated_query);
        o.passed = Some(sim.score + crate::similarity::EPSILON >= min_score);
        if !o.passed.unwrap_or(false) {
            o.message = format!("below min_score {:.2}", min_score);
        }
        if !sim.flags.is_empty() {
            o.message = format!("flagged: {}", flag_list(&sim.flags));
        }
        o.score = Some(sim.score);
        o.flags = sim.flags;
        o
    }

    pub fn generation_failed(tc: &TestCase, message: impl Into<String>) -> Self {
        Self::base(tc, OutcomeStatus::GenerationFailed, message.into())
    }

    pub fn execution_failed(
        tc: &TestCase,
        generated_query: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut o = Self::base(tc, OutcomeStatus::ExecutionFailed, message.into());
        if let Some(q) = &generated_query {
            o.query_exact_match = crate::similarity::queries_match(&tc.expected_query, q);
        }
        o.generated_query = generated_query;
        o
    }

    pub fn with_audit_id(mut self, audit_id: Option<String>) -> Self {
        self.audit_id = audit_id;
        self
    }

    pub fn with_rows(mut self, expected: Option<usize>, generated: Option<usize>) -> Self {
        self.expected_rows = expected;
        self.generated_rows = generated;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

fn flag_list(flags: &[ScoreFlag]) -> String {
    flags
        .iter()
        .map(|f| match f {
            ScoreFlag::DegenerateEmbedding => "degenerate_embedding",
            ScoreFlag::NegativeSimilarity => "negative_similarity",
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Aggregate over all outcomes of a run. `average` is the grand global score
/// and is `None` when nothing was scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub scored: usize,
    pub generation_failed: usize,
    pub execution_failed: usize,
    pub passed: usize,
    pub flagged: usize,
    /// Cases whose generated query text matches the expected query.
    #[serde(default)]
    pub exact_matches: usize,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[TestOutcome]) -> Self {
        let mut s = RunSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        let mut sum = 0.0f64;
        for o in outcomes {
            match o.status {
                OutcomeStatus::Scored => s.scored += 1,
                OutcomeStatus::GenerationFailed => s.generation_failed += 1,
                OutcomeStatus::ExecutionFailed => s.execution_failed += 1,
            }
            if o.passed == Some(true) {
                s.passed += 1;
            }
            if !o.flags.is_empty() {
                s.flagged += 1;
            }
            if o.query_exact_match {
                s.exact_matches += 1;
            }
            if let (OutcomeStatus::Scored, Some(score)) = (o.status, o.score) {
                sum += score;
                s.min = Some(s.min.map_or(score, |m| m.min(score)));
                s.max = Some(s.max.map_or(score, |m| m.max(score)));
            }
        }
        if s.scored > 0 {
            s.average = Some(sum / s.scored as f64);
        }
        s
    }

    /// Grand global score with the "no scores" case reported as 0.
    pub fn grand_score(&self) -> f64 {
        self.average.unwrap_or(0.0)
    }

    /// Exact query matches over all cases; `None` for an empty run.
    pub fn exact_match_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.exact_matches as f64 / self.total as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Expected,
    Generated,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Expected => "expected",
            AuditKind::Generated => "generated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "generated" => AuditKind::Generated,
            _ => AuditKind::Expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub test_name: String,
    #[serde(default)]
    pub run_id: Option<i64>,
    pub kind: AuditKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: AuditMetadata,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc() -> TestCase {
        TestCase {
            index: 1,
            question: "How many users?".into(),
            expected_query: "SELECT COUNT(*) FROM users".into(),
        }
    }

    fn sim(score: f64) -> Similarity {
        Similarity {
            score,
            raw_cosine: Some(score),
            flags: vec![],
            model: "test".into(),
            dims: 2,
        }
    }

    #[test]
    fn canonical_text_is_compact_json() {
        let r = QueryResult::from_rows(vec![vec![
            ScalarValue::Integer(5),
            ScalarValue::Text("a".into()),
            ScalarValue::Null,
        ]]);
        assert_eq!(r.canonical_text(false), r#"[[5,"a",null]]"#);
        assert_eq!(QueryResult::default().canonical_text(false), "[]");
    }

    #[test]
    fn canonical_text_sorts_rows_on_request() {
        let r = QueryResult::from_rows(vec![
            vec![ScalarValue::Text("b".into())],
            vec![ScalarValue::Text("a".into())],
        ]);
        assert_eq!(r.canonical_text(false), r#"[["b"],["a"]]"#);
        assert_eq!(r.canonical_text(true), r#"[["a"],["b"]]"#);
    }

    #[test]
    fn canonical_text_handles_odd_scalars() {
        let r = QueryResult::from_rows(vec![vec![
            ScalarValue::Real(f64::NAN),
            ScalarValue::Bytes(vec![0xde, 0xad]),
            ScalarValue::Bool(true),
        ]]);
        assert_eq!(r.canonical_text(false), r#"[["NaN","dead",true]]"#);
    }

    #[test]
    fn preview_matches_tuple_style() {
        let r = QueryResult::from_rows(vec![vec![ScalarValue::Integer(5)]]);
        assert_eq!(r.preview(5), "[(5,)]");
    }

    #[test]
    fn score_present_iff_scored() {
        let t = tc();
        let s = TestOutcome::scored(&t, t.expected_query.clone(), sim(0.9), 0.8);
        assert_eq!(s.status, OutcomeStatus::Scored);
        assert_eq!(s.score, Some(0.9));
        assert_eq!(s.passed, Some(true));
        assert!(s.query_exact_match);

        let g = TestOutcome::generation_failed(&t, "no query");
        assert!(g.score.is_none());
        let e = TestOutcome::execution_failed(&t, None, "no such table");
        assert!(e.score.is_none());
    }

    #[test]
    fn summary_over_nothing_scored_is_zero() {
        let t = tc();
        let outcomes = vec![TestOutcome::generation_failed(&t, "none")];
        let s = RunSummary::from_outcomes(&outcomes);
        assert_eq!(s.total, 1);
        assert_eq!(s.scored, 0);
        assert_eq!(s.average, None);
        assert_eq!(s.grand_score(), 0.0);

        let empty = RunSummary::from_outcomes(&[]);
        assert_eq!(empty.grand_score(), 0.0);
    }

    #[test]
    fn summary_averages_only_scored_cases() {
        let t = tc();
        let outcomes = vec![
            TestOutcome::scored(&t, "q1".into(), sim(0.8), 0.5),
            TestOutcome::scored(&t, "q2".into(), sim(0.6), 0.5),
            TestOutcome::generation_failed(&t, "none"),
        ];
        let s = RunSummary::from_outcomes(&outcomes);
        assert_eq!(s.scored, 2);
        assert_eq!(s.generation_failed, 1);
        assert!((s.grand_score() - 0.7).abs() < 1e-9);
        assert_eq!(s.min, Some(0.6));
        assert_eq!(s.max, Some(0.8));
    }

    #[test]
    fn summary_totals_exact_query_matches() {
        let t = tc();
        let outcomes = vec![
            TestOutcome::scored(&t, "select count(*) from users".into(), sim(1.0), 0.8),
            TestOutcome::scored(&t, "SELECT COUNT(id) FROM users".into(), sim(0.9), 0.8),
            TestOutcome::execution_failed(&t, Some("SELECT COUNT(*) FROM users;".into()), "timeout"),
            TestOutcome::generation_failed(&t, "none"),
        ];
        let s = RunSummary::from_outcomes(&outcomes);
        assert_eq!(s.exact_matches, 2);
        assert_eq!(s.exact_match_rate(), Some(0.5));
        assert_eq!(RunSummary::default().exact_match_rate(), None);
    }
}
