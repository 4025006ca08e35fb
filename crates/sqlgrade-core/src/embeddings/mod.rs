use crate::errors::ScoringError;
use crate::storage::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub mod hashing;
pub mod openai;
pub mod util;

/// Maps texts to fixed-dimension vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    fn model_id(&self) -> String;
}

/// Embedder plus the persistent embedding cache and the call timeout. Shared
/// by the similarity scorer and the audit recorder so each distinct text is
/// embedded at most once per model.
#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Option<Store>,
    refresh: bool,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self {
            embedder,
            cache: None,
            refresh: false,
            timeout,
        }
    }

    pub fn with_cache(mut self, store: Store, refresh: bool) -> Self {
        self.cache = Some(store);
        self.refresh = refresh;
        self
    }

    pub fn model_id(&self) -> String {
        self.embedder.model_id()
    }

    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ScoringError> {
        let model_id = self.embedder.model_id();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        if let (Some(store), false) = (&self.cache, self.refresh) {
            for (i, text) in texts.iter().enumerate() {
                let key = util::embed_cache_key(&model_id, text);
                match store.get_embedding(&key) {
                    Ok(Some((_m, vec))) => out[i] = Some(vec),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(event = "embedding_cache_read_failed", error = %e);
                    }
                }
            }
        }

        let missing: Vec<usize> = (0..texts.len()).filter(|i| out[*i].is_none()).collect();
        if !missing.is_empty() {
            // Duplicate texts are sent once.
            let mut unique: Vec<String> = Vec::new();
            for i in &missing {
                if !unique.contains(&texts[*i]) {
                    unique.push(texts[*i].clone());
                }
            }

            let vectors = match timeout(self.timeout, self.embedder.embed(&unique)).await {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(ScoringError::Embedding(format!("{:#}", e))),
                Err(_) => return Err(ScoringError::Timeout(self.timeout)),
            };
            if vectors.len() != unique.len() {
                return Err(ScoringError::VectorCount {
                    expected: unique.len(),
                    got: vectors.len(),
                });
            }

            for (text, vec) in unique.iter().zip(vectors.iter()) {
                if let Some(store) = &self.cache {
                    let key = util::embed_cache_key(&model_id, text);
                    if let Err(e) = store.put_embedding(&key, &model_id, vec) {
                        tracing::warn!(event = "embedding_cache_write_failed", error = %e);
                    }
                }
            }
            for i in missing {
                if let Some(pos) = unique.iter().position(|t| *t == texts[i]) {
                    out[i] = Some(vectors[pos].clone());
                }
            }
        }

        out.into_iter()
            .map(|v| {
                v.ok_or(ScoringError::VectorCount {
                    expected: texts.len(),
                    got: 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
        fn model_id(&self) -> String {
            "counting".into()
        }
    }

    #[tokio::test]
    async fn cache_avoids_repeat_calls() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let svc = EmbeddingService::new(embedder.clone(), Duration::from_secs(5))
            .with_cache(store, false);

        let texts = vec!["[[5]]".to_string(), "[[5]]".to_string(), "[]".to_string()];
        let first = svc.embed_texts(&texts).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], first[1]);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 2);

        let again = svc.embed_texts(&texts).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }
        fn model_id(&self) -> String {
            "short".into()
        }
    }

    #[tokio::test]
    async fn wrong_vector_count_is_reported() {
        let svc = EmbeddingService::new(Arc::new(ShortEmbedder), Duration::from_secs(5));
        let err = svc
            .embed_texts(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScoringError::VectorCount {
                expected: 2,
                got: 1
            }
        ));
    }
}
