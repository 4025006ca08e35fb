use super::Embedder;
use async_trait::async_trait;
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIEmbedder {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embeddings API error: {}", error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        parse_embeddings(&json, texts.len())
    }

    fn model_id(&self) -> String {
        format!("openai:{}", self.model)
    }
}

/// Reads `data[*].embedding`, ordered by each item's `index`.
fn parse_embeddings(json: &serde_json::Value, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("OpenAI embeddings response missing data"))?;

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("OpenAI embeddings item {} missing embedding", pos))?
            .iter()
            .map(|x| {
                x.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("embedding contains non-numeric value"))
            })
            .collect::<anyhow::Result<Vec<f32>>>()?;
        match slots.get_mut(index) {
            Some(slot) => *slot = Some(vec),
            None => anyhow::bail!("OpenAI embeddings index {} out of range", index),
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| anyhow::anyhow!("OpenAI embeddings missing index {}", i)))
        .collect()
}
