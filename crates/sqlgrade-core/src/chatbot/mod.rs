use crate::errors::AdapterError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub mod http;
pub mod scripted;

/// Canonical field first, legacy spelling second.
pub const DEFAULT_QUERY_FIELDS: &[&str] = &["captured_query", "captured_queries"];
pub const DEFAULT_PROMPT_PREFIX: &str = "Question: ";

/// The chatbot under evaluation: plain text in, raw payload text out. Its
/// internals are none of our business.
#[async_trait]
pub trait Chatbot: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, AdapterError>;
    fn provider_name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct ChatbotAdapter {
    chatbot: Arc<dyn Chatbot>,
    prompt_prefix: String,
    query_fields: Vec<String>,
    timeout: Duration,
}

impl ChatbotAdapter {
    pub fn new(chatbot: Arc<dyn Chatbot>) -> Self {
        Self {
            chatbot,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
            query_fields: DEFAULT_QUERY_FIELDS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = prefix.into();
        self
    }

    pub fn with_query_fields(mut self, fields: Vec<String>) -> Self {
        if !fields.is_empty() {
            self.query_fields = fields;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.chatbot.provider_name()
    }

    /// Asks the chatbot and pulls the generated SQL out of its payload.
    /// `Ok(None)` covers every malformed or empty payload; only transport
    /// failures are errors.
    pub async fn generate(&self, question: &str) -> Result<Option<String>, AdapterError> {
        let prompt = format!("{}{}", self.prompt_prefix, question);
        let raw = match timeout(self.timeout, self.chatbot.ask(&prompt)).await {
            Ok(r) => r?,
            Err(_) => return Err(AdapterError::Timeout(self.timeout)),
        };
        let query = extract_query(&raw, &self.query_fields);
        if query.is_none() {
            tracing::debug!(
                event = "no_query_in_payload",
                payload_len = raw.len(),
                fields = ?self.query_fields
            );
        }
        Ok(query)
    }
}

/// Tries each candidate field in order and returns the first usable value.
/// A payload that is itself a JSON string is decoded once more.
pub fn extract_query(raw: &str, fields: &[String]) -> Option<String> {
    let mut value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    if let Some(inner) = value.as_str() {
        value = serde_json::from_str(inner.trim()).ok()?;
    }
    let obj = value.as_object()?;

    fields.iter().find_map(|f| obj.get(f).and_then(query_from_value))
}

fn query_from_value(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => non_empty(s),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str())
            .find_map(non_empty),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        DEFAULT_QUERY_FIELDS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_canonical_and_legacy_fields() {
        assert_eq!(
            extract_query(r#"{"captured_query": "SELECT 1"}"#, &fields()),
            Some("SELECT 1".into())
        );
        assert_eq!(
            extract_query(r#"{"captured_queries": "SELECT 2"}"#, &fields()),
            Some("SELECT 2".into())
        );
        // canonical wins when both are present
        assert_eq!(
            extract_query(
                r#"{"captured_queries": "SELECT 2", "captured_query": "SELECT 1"}"#,
                &fields()
            ),
            Some("SELECT 1".into())
        );
    }

    #[test]
    fn falls_through_empty_canonical_field() {
        assert_eq!(
            extract_query(
                r#"{"captured_query": "  ", "captured_queries": ["", "SELECT 3"]}"#,
                &fields()
            ),
            Some("SELECT 3".into())
        );
    }

    #[test]
    fn malformed_payloads_yield_none() {
        for raw in [
            "",
            "not json",
            "[1, 2]",
            r#"{"answer": "5 users"}"#,
            r#"{"captured_query": null}"#,
            r#"{"captured_query": 42}"#,
        ] {
            assert_eq!(extract_query(raw, &fields()), None, "payload: {raw}");
        }
    }

    #[test]
    fn double_encoded_payload_is_unwrapped() {
        let raw = serde_json::to_string(r#"{"captured_query": "SELECT 1"}"#).unwrap();
        assert_eq!(extract_query(&raw, &fields()), Some("SELECT 1".into()));
    }

    struct Echo;

    #[async_trait]
    impl Chatbot for Echo {
        async fn ask(&self, prompt: &str) -> Result<String, AdapterError> {
            Ok(serde_json::json!({ "captured_query": prompt }).to_string())
        }
        fn provider_name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn adapter_prefixes_the_question() {
        let adapter = ChatbotAdapter::new(Arc::new(Echo));
        let q = adapter.generate("How many users?").await.unwrap();
        assert_eq!(q.as_deref(), Some("Question: How many users?"));

        let adapter = ChatbotAdapter::new(Arc::new(Echo)).with_prompt_prefix("");
        let q = adapter.generate("SELECT 1").await.unwrap();
        assert_eq!(q.as_deref(), Some("SELECT 1"));
    }

    struct Slow;

    #[async_trait]
    impl Chatbot for Slow {
        async fn ask(&self, _prompt: &str) -> Result<String, AdapterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".into())
        }
        fn provider_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn adapter_times_out() {
        let adapter =
            ChatbotAdapter::new(Arc::new(Slow)).with_timeout(Duration::from_millis(20));
        let err = adapter.generate("q").await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
        assert!(!err.is_fatal());
    }
}
