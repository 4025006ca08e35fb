use crate::embeddings::util::cosine_similarity;
use crate::embeddings::EmbeddingService;
use crate::errors::ScoringError;
use crate::model::{QueryResult, ScoreFlag, Similarity};
use std::sync::Arc;

/// Scores within EPSILON of `min_score` count as passing.
pub const EPSILON: f64 = 1e-6;

/// Compares two result sets through the embeddings of their canonical text.
#[derive(Clone)]
pub struct SimilarityScorer {
    embeddings: Arc<EmbeddingService>,
    sort_rows: bool,
}

impl SimilarityScorer {
    pub fn new(embeddings: Arc<EmbeddingService>, sort_rows: bool) -> Self {
        Self {
            embeddings,
            sort_rows,
        }
    }

    pub fn model_id(&self) -> String {
        self.embeddings.model_id()
    }

    pub fn canonical_text(&self, result: &QueryResult) -> String {
        result.canonical_text(self.sort_rows)
    }

    pub async fn score(
        &self,
        expected: &QueryResult,
        generated: &QueryResult,
    ) -> Result<Similarity, ScoringError> {
        let texts = vec![self.canonical_text(expected), self.canonical_text(generated)];
        let vectors = self.embeddings.embed_texts(&texts).await?;
        similarity_from_vectors(&vectors[0], &vectors[1], self.embeddings.model_id())
    }
}

/// Turns two embeddings into a bounded score. Undefined or negative cosine
/// values become 0 and carry a flag instead of failing the case.
pub fn similarity_from_vectors(
    a: &[f32],
    b: &[f32],
    model: String,
) -> Result<Similarity, ScoringError> {
    let dims = a.len();
    let (score, raw, flags) = match cosine_similarity(a, b)? {
        None => {
            tracing::warn!(event = "degenerate_embedding", model = %model, dims);
            (0.0, None, vec![ScoreFlag::DegenerateEmbedding])
        }
        Some(c) if c < 0.0 => {
            tracing::warn!(event = "negative_similarity", model = %model, cosine = c);
            (0.0, Some(c), vec![ScoreFlag::NegativeSimilarity])
        }
        Some(c) => (c, Some(c), Vec::new()),
    };
    Ok(Similarity {
        score,
        raw_cosine: raw,
        flags,
        model,
        dims,
    })
}

/// Cheap secondary check: query strings equal after whitespace collapsing,
/// case folding and dropping a trailing semicolon. Quoted literals and
/// identifiers are compared verbatim. Never the verdict.
pub fn queries_match(a: &str, b: &str) -> bool {
    normalize_query(a) == normalize_query(b)
}

fn normalize_query(q: &str) -> String {
    let mut out = String::with_capacity(q.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    let mut chars = q.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == open {
                if chars.peek() == Some(&open) {
                    out.push(open);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
        }
        out.extend(c.to_lowercase());
    }
    out.trim_end_matches(';').trim_end().to_string()
}
