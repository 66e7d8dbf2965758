use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Absent key means the tutor runs on canned responses only.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            endpoint: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TutorConfig {
    /// Prior question/answer pairs sent along with each new message.
    #[serde(default = "default_history_pairs")]
    pub history_pairs: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            history_pairs: default_history_pairs(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn default_history_pairs() -> usize {
    5
}

fn default_max_message_chars() -> usize {
    2000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub file_path: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            file_path: default_storage_path(),
            database_url: None,
        }
    }
}

fn default_storage_path() -> String {
    "chat_messages.jsonl".into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tutor: TutorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|err| TutorError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Loads the file when one is given, then applies `TUTORLY_*` overrides.
    pub fn from_env_or_file(path: Option<impl AsRef<Path>>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(key) = env::var("TUTORLY_GEMINI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("TUTORLY_GEMINI_ENDPOINT") {
            self.model.endpoint = Some(endpoint);
        }
        if let Ok(model) = env::var("TUTORLY_MODEL") {
            self.model.model = model;
        }
        if let Ok(timeout) = env::var("TUTORLY_REQUEST_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.model.request_timeout_secs = parsed;
            }
        }
        if let Ok(pairs) = env::var("TUTORLY_HISTORY_PAIRS") {
            if let Ok(parsed) = pairs.parse::<usize>() {
                self.tutor.history_pairs = parsed;
            }
        }
        if let Ok(backend) = env::var("TUTORLY_STORAGE_BACKEND") {
            self.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "sqlite" => StorageBackend::Sqlite,
                _ => StorageBackend::File,
            };
        }
        if let Ok(path) = env::var("TUTORLY_STORAGE_PATH") {
            self.storage.file_path = path;
        }
        if let Ok(url) = env::var("TUTORLY_DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Ok(format) = env::var("TUTORLY_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            };
        }
    }
}
