use super::{Chatbot, DEFAULT_PROMPT_PREFIX};
use crate::errors::AdapterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;

/// Answers from a fixed question → payload table. Used for replaying
/// recorded chatbot responses and in tests. Unknown questions get an empty
/// object, which the adapter treats as "no query generated".
#[derive(Debug, Clone)]
pub struct ScriptedChatbot {
    responses: HashMap<String, String>,
    prompt_prefix: String,
}

impl ScriptedChatbot {
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
        }
    }

    /// Must match the prefix the adapter puts in front of questions.
    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = prefix.into();
        self
    }

    /// Loads a JSONL replay file. Each line holds a `question` and either a
    /// `response` (string or object) or the payload fields inline, e.g.
    /// `{"question": "How many users?", "captured_query": "SELECT COUNT(*) FROM users"}`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "failed to open replay file '{}': {}",
                path.as_ref().display(),
                e
            )
        })?;
        let reader = std::io::BufReader::new(file);

        let mut responses = HashMap::new();
        for (i, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            if line.trim().is_empty() {
                continue;
            }
            let v: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| anyhow::anyhow!("line {}: parse error: {}", i + 1, e))?;
            let question = v
                .get("question")
                .and_then(|q| q.as_str())
                .ok_or_else(|| anyhow::anyhow!("line {}: missing 'question'", i + 1))?
                .to_string();
            let payload = match v.get("response") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => v.to_string(),
            };
            if responses.insert(question.clone(), payload).is_some() {
                tracing::warn!(event = "replay_duplicate_question", line = i + 1, question = %question);
            }
        }
        Ok(Self::new(responses))
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl Default for ScriptedChatbot {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl Chatbot for ScriptedChatbot {
    async fn ask(&self, prompt: &str) -> Result<String, AdapterError> {
        let question = prompt.strip_prefix(&self.prompt_prefix).unwrap_or(prompt);
        Ok(self
            .responses
            .get(question)
            .or_else(|| self.responses.get(prompt))
            .cloned()
            .unwrap_or_else(|| "{}".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
