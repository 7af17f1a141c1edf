//! OpenAI-compatible chat completion connection.

use crate::config::{ConnectionConfig, EnvLookup};
use crate::connections::ActionSpec;
use crate::connections::actions::{
    GENERATE_TEXT, GENERATION_ACTIONS, GenerateTextArgs, GenerationAction, decode_action,
};
use crate::connections::traits::Connection;
use crate::error::{ConnectionError, Result};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Generation provider speaking the `/chat/completions` protocol.
pub struct OpenAiConnection {
    name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiConnection {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
        })
    }

    /// Key from the descriptor's `api_key` option or `OPENAI_API_KEY`.
    pub fn from_config(config: &ConnectionConfig, env: EnvLookup<'_>) -> Result<Self> {
        let api_key = config
            .option("api_key")
            .map(str::to_string)
            .or_else(|| env("OPENAI_API_KEY"));
        let base_url = config
            .option("base_url")
            .map(str::to_string)
            .or_else(|| env("OPENAI_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = config.option("model").unwrap_or(DEFAULT_MODEL);

        Self::new(&config.name, api_key, base_url, model)
    }

    fn failure(&self, message: impl Into<String>) -> ConnectionError {
        ConnectionError::ActionFailed {
            connection: self.name.clone(),
            action: GENERATE_TEXT.to_string(),
            message: message.into(),
        }
    }

    async fn generate_text(&self, args: GenerateTextArgs) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &args.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &args.prompt,
                },
            ],
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&request)
            .send()
            .await
            .map_err(|error| self.failure(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {status}: {body}")).into());
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|error| self.failure(format!("invalid completion response: {error}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| self.failure("completion had no content"))?;

        tracing::debug!(
            connection = %self.name,
            model = %self.model,
            chars = text.len(),
            "text generated"
        );
        Ok(Value::String(text))
    }
}

impl Connection for OpenAiConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &'static [ActionSpec] {
        GENERATION_ACTIONS
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    async fn perform(&self, action: &str, args: Value) -> Result<Value> {
        match decode_action(&self.name, action, args)? {
            GenerationAction::GenerateText(args) => self.generate_text(args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_model_and_key_from_config() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "name": "openai",
            "model": "gpt-4.1",
            "base_url": "http://localhost:8080/v1/",
        }))
        .expect("config decodes");

        let connection = OpenAiConnection::from_config(&config, &|key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .expect("builds");

        assert!(Connection::is_configured(&connection));
        assert!(Connection::generates_text(&connection));
        assert_eq!(connection.model, "gpt-4.1");
        assert_eq!(connection.base_url, "http://localhost:8080/v1");
    }
}
