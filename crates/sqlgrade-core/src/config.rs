use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_suite")]
    pub suite: String,
    pub dataset: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chatbot: ChatbotConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    #[default]
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DbBackend,
    /// SQLite file, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Full connection URL; wins over the individual fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Also run the read-only guard over expected queries.
    #[serde(default = "default_true")]
    pub guard_expected: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::Sqlite,
            path: None,
            url: None,
            host: None,
            user: None,
            password: None,
            database: None,
            guard_expected: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatbotProvider {
    #[default]
    Http,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatbotConfig {
    #[serde(default)]
    pub provider: ChatbotProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_input_field")]
    pub input_field: String,
    /// JSON pointer into the HTTP response body, e.g. `/data/0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_file: Option<String>,
    #[serde(default = "default_prompt_prefix")]
    pub prompt_prefix: String,
    /// Candidate payload fields, tried in order. Empty means the defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_fields: Vec<String>,
    /// Name of the env var holding a bearer token for the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            provider: ChatbotProvider::Http,
            url: None,
            input_field: default_input_field(),
            response_pointer: None,
            replay_file: None,
            prompt_prefix: default_prompt_prefix(),
            query_fields: Vec::new(),
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    Openai,
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedderConfig {
    #[serde(default)]
    pub provider: EmbedderProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Hashing embedder only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderProvider::Openai,
            model: default_embedding_model(),
            dims: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub include_generated: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_generated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub sort_rows: bool,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            sort_rows: false,
            timeouts: Timeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeouts {
    #[serde(default = "default_db_seconds")]
    pub db_seconds: u64,
    #[serde(default = "default_chatbot_seconds")]
    pub chatbot_seconds: u64,
    #[serde(default = "default_embedder_seconds")]
    pub embedder_seconds: u64,
    #[serde(default = "default_audit_seconds")]
    pub audit_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            db_seconds: default_db_seconds(),
            chatbot_seconds: default_chatbot_seconds(),
            embedder_seconds: default_embedder_seconds(),
            audit_seconds: default_audit_seconds(),
        }
    }
}

impl Timeouts {
    pub fn db(&self) -> Duration {
        Duration::from_secs(self.db_seconds)
    }
    pub fn chatbot(&self) -> Duration {
        Duration::from_secs(self.chatbot_seconds)
    }
    pub fn embedder(&self) -> Duration {
        Duration::from_secs(self.embedder_seconds)
    }
    pub fn audit(&self) -> Duration {
        Duration::from_secs(self.audit_seconds)
    }
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}
fn default_suite() -> String {
    "default".into()
}
fn default_true() -> bool {
    true
}
fn default_input_field() -> String {
    "query_text".into()
}
fn default_prompt_prefix() -> String {
    crate::chatbot::DEFAULT_PROMPT_PREFIX.into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_min_score() -> f64 {
    0.80
}
fn default_db_seconds() -> u64 {
    30
}
fn default_chatbot_seconds() -> u64 {
    60
}
fn default_embedder_seconds() -> u64 {
    30
}
fn default_audit_seconds() -> u64 {
    10
}

pub fn load_config(path: &Path, strict: bool) -> Result<EvalConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);

    let mut cfg: EvalConfig = serde_ignored::deserialize(deserializer, |p| {
        ignored_keys.insert(p.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let unknown: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?} (file: {})",
                unknown,
                path.display()
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?unknown, file = %path.display());
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    normalize_paths(&mut cfg, path);
    validate(&cfg)?;
    Ok(cfg)
}

/// Relative file paths in the config are relative to the config file.
fn normalize_paths(cfg: &mut EvalConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    let resolve = |p: &mut String| {
        if p.is_empty() || p == ":memory:" || Path::new(p.as_str()).is_absolute() {
            return;
        }
        *p = base.join(p.as_str()).to_string_lossy().into_owned();
    };

    resolve(&mut cfg.dataset);
    if let Some(p) = cfg.database.path.as_mut() {
        resolve(p);
    }
    if let Some(p) = cfg.chatbot.replay_file.as_mut() {
        resolve(p);
    }
}

pub fn validate(cfg: &EvalConfig) -> Result<(), ConfigError> {
    if cfg.dataset.trim().is_empty() {
        return Err(ConfigError("'dataset' must name a file".into()));
    }
    if !(0.0..=1.0).contains(&cfg.settings.min_score) {
        return Err(ConfigError(format!(
            "settings.min_score must be within [0, 1], got {}",
            cfg.settings.min_score
        )));
    }
    let t = &cfg.settings.timeouts;
    if t.db_seconds == 0 || t.chatbot_seconds == 0 || t.embedder_seconds == 0 || t.audit_seconds == 0 {
        return Err(ConfigError("settings.timeouts values must be > 0".into()));
    }
    if cfg.database.backend == DbBackend::Sqlite && cfg.database.path.is_none() {
        return Err(ConfigError("database.path is required for the sqlite backend".into()));
    }
    match cfg.chatbot.provider {
        ChatbotProvider::Http if cfg.chatbot.url.is_none() => {
            return Err(ConfigError("chatbot.url is required for the http provider".into()))
        }
        ChatbotProvider::Replay if cfg.chatbot.replay_file.is_none() => {
            return Err(ConfigError(
                "chatbot.replay_file is required for the replay provider".into(),
            ))
        }
        _ => {}
    }
    if cfg.embedder.dims == Some(0) {
        return Err(ConfigError("embedder.dims must be > 0".into()));
    }
    Ok(())
}

impl EvalConfig {
    pub fn dataset_path(&self) -> PathBuf {
        PathBuf::from(&self.dataset)
    }
}

pub const SAMPLE_CONFIG: &str = r#"version: 1
suite: demo
dataset: cases.json

database:
  backend: sqlite
  path: demo.db
  # backend: mysql
  # host, user, password and database fall back to
  # SQLGRADE_DB_HOST / SQLGRADE_DB_USER / SQLGRADE_DB_PASSWORD / SQLGRADE_DB_NAME

chatbot:
  provider: replay
  replay_file: replay.jsonl
  # provider: http
  # url: http://127.0.0.1:7860/api/predict
  # input_field: query_text
  # response_pointer: /data/0

embedder:
  provider: hashing
  # provider: openai
  # model: text-embedding-3-small

audit:
  enabled: true
  include_generated: false

settings:
  min_score: 0.8
  sort_rows: false
  timeouts:
    db_seconds: 30
    chatbot_seconds: 60
    embedder_seconds: 30
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) -> PathBuf {
        let p = dir.join("sqlgrade.yaml");
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn sample_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sqlgrade.yaml");
        write_sample_config(&p).unwrap();

        let cfg = load_config(&p, true).unwrap();
        assert_eq!(cfg.suite, "demo");
        assert_eq!(cfg.chatbot.provider, ChatbotProvider::Replay);
        assert_eq!(cfg.embedder.provider, EmbedderProvider::Hashing);
        assert_eq!(cfg.chatbot.prompt_prefix, "Question: ");
        assert_eq!(cfg.settings.timeouts.audit(), Duration::from_secs(10));
        assert!(cfg.database.guard_expected);
        assert_eq!(
            cfg.dataset_path(),
            dir.path().join("cases.json"),
            "dataset resolved against the config dir"
        );
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "dataset: cases.json\ndatabase: { path: x.db, pasword: oops }\nchatbot: { provider: replay, replay_file: r.jsonl }\n",
        );
        let err = load_config(&p, true).unwrap_err();
        assert!(err.0.contains("database.pasword"), "{}", err.0);

        // lenient mode only warns
        assert!(load_config(&p, false).is_ok());
    }

    #[test]
    fn provider_requirements_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "dataset: cases.json\ndatabase: { path: x.db }\n");
        let err = load_config(&p, false).unwrap_err();
        assert!(err.0.contains("chatbot.url"), "{}", err.0);

        let p = write(
            dir.path(),
            "dataset: cases.json\nchatbot: { url: 'http://localhost' }\n",
        );
        let err = load_config(&p, false).unwrap_err();
        assert!(err.0.contains("database.path"), "{}", err.0);
    }

    #[test]
    fn rejects_out_of_range_min_score_and_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        let base = "dataset: c.json\ndatabase: { path: x.db }\nchatbot: { url: 'http://h' }\n";
        let p = write(dir.path(), &format!("{base}settings: {{ min_score: 1.5 }}\n"));
        assert!(load_config(&p, false).is_err());

        let p = write(dir.path(), &format!("version: 2\n{base}"));
        let err = load_config(&p, false).unwrap_err();
        assert!(err.0.contains("unsupported config version 2"));
    }

    #[test]
    fn memory_and_absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "dataset: /abs/cases.json\ndatabase: { path: ':memory:' }\nchatbot: { url: 'http://h' }\n",
        );
        let cfg = load_config(&p, false).unwrap();
        assert_eq!(cfg.dataset, "/abs/cases.json");
        assert_eq!(cfg.database.path.as_deref(), Some(":memory:"));
    }
}
