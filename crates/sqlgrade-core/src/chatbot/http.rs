use super::Chatbot;
use crate::errors::AdapterError;
use async_trait::async_trait;
use serde_json::json;

/// Chatbot behind an HTTP endpoint. The prompt is POSTed as
/// `{ "<input_field>": prompt }`; the response body is the payload, or the
/// value found at `response_pointer` when the endpoint wraps it
/// (e.g. `/data/0` for Gradio's predict API).
pub struct HttpChatbot {
    pub url: String,
    pub input_field: String,
    pub response_pointer: Option<String>,
    pub api_key: Option<String>,
    pub client: reqwest::Client,
}

impl HttpChatbot {
    pub fn new(url: String, input_field: String) -> Self {
        Self {
            url,
            input_field,
            response_pointer: None,
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_response_pointer(mut self, pointer: Option<String>) -> Self {
        self.response_pointer = pointer;
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }
}

#[async_trait]
impl Chatbot for HttpChatbot {
    async fn ask(&self, prompt: &str) -> Result<String, AdapterError> {
        let mut body = serde_json::Map::new();
        body.insert(self.input_field.clone(), json!(prompt));

        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(classify)?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(unwrap_payload(text, self.response_pointer.as_deref()))
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

fn classify(e: reqwest::Error) -> AdapterError {
    if e.is_connect() {
        AdapterError::Unreachable(e.to_string())
    } else {
        AdapterError::Transport(e.to_string())
    }
}

/// Applies the JSON pointer, if any. Bodies that do not parse, or pointers
/// that do not resolve, pass the raw body through so extraction can decide.
fn unwrap_payload(body: String, pointer: Option<&str>) -> String {
    let Some(pointer) = pointer else {
        return body;
    };
    let Ok(v) = serde_json::from_str::<serde_json::Value>(&body) else {
        return body;
    };
    match v.pointer(pointer) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_unwraps_gradio_envelope() {
        let body = r#"{"data": ["{\"captured_query\": \"SELECT 1\"}"]}"#.to_string();
        assert_eq!(
            unwrap_payload(body, Some("/data/0")),
            r#"{"captured_query": "SELECT 1"}"#
        );
    }

    #[test]
    fn pointer_to_object_is_reserialized() {
        let body = r#"{"result": {"captured_query": "SELECT 1"}}"#.to_string();
        let out = unwrap_payload(body, Some("/result"));
        assert_eq!(out, r#"{"captured_query":"SELECT 1"}"#);
    }

    #[test]
    fn unresolvable_pointer_passes_body_through() {
        assert_eq!(unwrap_payload("oops".into(), Some("/data/0")), "oops");
        assert_eq!(unwrap_payload("{}".into(), Some("/data/0")), "{}");
        assert_eq!(unwrap_payload("{}".into(), None), "{}");
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let bot = HttpChatbot::new("http://127.0.0.1:9/predict".into(), "query_text".into());
        let err = bot.ask("Question: hi").await.unwrap_err();
        assert!(err.is_fatal(), "expected unreachable, got {err}");
    }
}
