use super::Embedder;
use async_trait::async_trait;

pub const DEFAULT_DIMS: usize = 256;

/// Local, deterministic embedder based on feature hashing of word tokens and
/// character trigrams. Needs no network access, so it backs offline runs and
/// tests. Similar texts share buckets; it carries no real semantics.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];

        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '.' && c != '-')
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            v[(h % self.dims as u64) as usize] += 2.0;
        }

        let chars: Vec<char> = text.chars().collect();
        if !chars.is_empty() && chars.len() < 3 {
            let gram: String = chars.iter().collect();
            let h = fnv1a(gram.as_bytes());
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        for w in chars.windows(3) {
            let gram: String = w.iter().collect();
            let h = fnv1a(gram.as_bytes());
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_id(&self) -> String {
        format!("hashing-{}", self.dims)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}
