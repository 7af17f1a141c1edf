//! Configuration loading and validation.
//!
//! An agent is described by a descriptor file (`agents/<name>.json` or
//! `agents/<name>.toml`) carrying its persona and connection list. Secrets and
//! deployment settings come from the environment.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Fields every agent descriptor must provide.
pub const REQUIRED_FIELDS: &[&str] = &["name", "bio", "traits", "examples", "loop_delay", "config"];

/// Environment lookup, injectable so configuration can be tested without
/// touching the process environment.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a variable from the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Agent descriptor: persona, cadence and connections.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    /// Persona lines, joined into the system prompt.
    pub bio: Vec<String>,

    pub traits: Vec<String>,

    /// Few-shot examples. Carried for descriptor compatibility.
    pub examples: Vec<String>,

    /// Seconds to sleep between ticks.
    pub loop_delay: f64,

    /// Connection configurations, in registration order.
    pub config: Vec<ConnectionConfig>,

    /// Connection that provides the channel's messages.
    #[serde(default = "default_feed")]
    pub feed: String,

    /// Self-mention handle. Defaults to the lowercased agent name.
    #[serde(default)]
    pub handle: Option<String>,

    /// Author substrings that mark the agent's own platform account.
    #[serde(default = "default_account_markers")]
    pub account_markers: Vec<String>,

    #[serde(default = "default_message_read_count")]
    pub message_read_count: u32,

    /// Maximum number of context snippets injected into the system prompt.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Platform ceiling for reply text plus any visible reasoning trace.
    #[serde(default = "default_reply_char_limit")]
    pub reply_char_limit: usize,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// One entry in the descriptor's connection list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,

    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

impl ConnectionConfig {
    /// String option, if present.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

fn default_feed() -> String {
    "discord".into()
}

fn default_account_markers() -> Vec<String> {
    vec!["APP".into()]
}

fn default_message_read_count() -> u32 {
    10
}

fn default_context_limit() -> usize {
    5
}

fn default_reply_char_limit() -> usize {
    2000
}

fn default_retention_days() -> u32 {
    30
}

impl AgentConfig {
    /// Load `<agents_dir>/<agent_name>.json`, falling back to `.toml`.
    pub fn load(agents_dir: &Path, agent_name: &str) -> Result<Self> {
        let json_path = agents_dir.join(format!("{agent_name}.json"));
        let toml_path = agents_dir.join(format!("{agent_name}.toml"));

        if !json_path.exists() && toml_path.exists() {
            Self::load_from_path(&toml_path)
        } else {
            Self::load_from_path(&json_path)
        }
    }

    /// Load from a specific descriptor file. The format follows the extension.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: display.clone(),
            source: Arc::new(error),
        })?;

        let value: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|error| ConfigError::Parse {
                path: display.clone(),
                message: error.to_string(),
            })?,
            _ => serde_json::from_str(&content).map_err(|error| ConfigError::Parse {
                path: display.clone(),
                message: error.to_string(),
            })?,
        };

        Self::from_value(value, &display)
    }

    /// Validate required fields, then decode.
    pub fn from_value(value: Value, source: &str) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(
                ConfigError::Invalid(format!("{source}: descriptor must be an object")).into(),
            );
        };

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| !fields.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing).into());
        }

        let config: AgentConfig = serde_json::from_value(value).map_err(|error| ConfigError::Parse {
            path: source.to_string(),
            message: error.to_string(),
        })?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()).into());
        }
        if !self.loop_delay.is_finite() || self.loop_delay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "loop_delay must be a non-negative number of seconds, got {}",
                self.loop_delay
            ))
            .into());
        }
        if self.message_read_count == 0 {
            return Err(ConfigError::Invalid("message_read_count must be at least 1".into()).into());
        }
        if self.config.is_empty() {
            return Err(
                ConfigError::Invalid("config must list at least one connection".into()).into(),
            );
        }
        Ok(())
    }

    /// Lowercased self-mention handle.
    pub fn handle(&self) -> String {
        self.handle
            .as_deref()
            .unwrap_or(&self.name)
            .trim()
            .trim_start_matches('@')
            .to_lowercase()
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_secs_f64(self.loop_delay)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// Deployment settings taken from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// The single channel this agent watches.
    pub channel_id: Option<String>,

    /// SQLite database path for the dedup ledger and context store.
    pub database_path: PathBuf,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: EnvLookup<'_>) -> Self {
        let database_path = env("REPLYBOT_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("replybot.db"));

        Self {
            channel_id: env("CHANNEL_ID"),
            database_path,
        }
    }

    /// The watched channel, required to run the loop.
    pub fn require_channel_id(&self) -> Result<&str> {
        self.channel_id
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey("CHANNEL_ID".into()).into())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("replybot"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}
