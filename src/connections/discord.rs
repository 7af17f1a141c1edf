//! Discord feed connection (REST, bot token).

use crate::config::{ConnectionConfig, EnvLookup};
use crate::connections::actions::{
    FEED_ACTIONS, FeedAction, READ_MESSAGES, REPLY_TO_MESSAGE, ReadMessagesArgs,
    ReplyToMessageArgs, decode_action,
};
use crate::connections::traits::Connection;
use crate::connections::ActionSpec;
use crate::error::{ConnectionError, Result};
use anyhow::Context as _;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects message content longer than this.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Discord caps a single history page at 100 messages.
const MAX_PAGE_SIZE: u32 = 100;

/// Discord adapter state.
pub struct DiscordConnection {
    name: String,
    token: Option<String>,
    api_base: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: Option<String>,
    author: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    username: String,
    #[serde(default)]
    bot: bool,
}

impl DiscordConnection {
    /// Create a new Discord connection.
    pub fn new(
        name: impl Into<String>,
        token: Option<String>,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Token from the descriptor's `token` option or `DISCORD_TOKEN`.
    pub fn from_config(config: &ConnectionConfig, env: EnvLookup<'_>) -> Result<Self> {
        let token = config
            .option("token")
            .map(str::to_string)
            .or_else(|| env("DISCORD_TOKEN"));
        let api_base = config
            .option("api_base")
            .map(str::to_string)
            .or_else(|| env("DISCORD_API_BASE"))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self::new(&config.name, token, api_base)
    }

    fn failure(&self, action: &str, message: impl Into<String>) -> ConnectionError {
        ConnectionError::ActionFailed {
            connection: self.name.clone(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token.as_deref().unwrap_or_default())
    }

    async fn read_messages(&self, args: ReadMessagesArgs) -> Result<Value> {
        let url = format!("{}/channels/{}/messages", self.api_base, args.channel_id);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.authorization())
            .query(&[("limit", args.count.clamp(1, MAX_PAGE_SIZE))])
            .send()
            .await
            .map_err(|error| ConnectionError::FeedFetch {
                connection: self.name.clone(),
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::FeedFetch {
                connection: self.name.clone(),
                message: format!("HTTP {status}: {}", truncate(&body, 200)),
            }
            .into());
        }

        let messages: Vec<DiscordMessage> = response
            .json()
            .await
            .map_err(|error| {
                self.failure(READ_MESSAGES, format!("invalid message list: {error}"))
            })?;

        // Discord returns newest first, which is what the feed contract promises.
        let messages: Vec<Value> = messages
            .into_iter()
            .map(|message| {
                let author = if message.author.bot {
                    format!("{} APP", message.author.username)
                } else {
                    message.author.username
                };
                let mut fields = json!({
                    "id": message.id,
                    "author": author,
                    "body": message.content,
                });
                if let Some(timestamp) = message.timestamp {
                    fields["timestamp"] = Value::String(timestamp);
                }
                fields
            })
            .collect();

        tracing::debug!(connection = %self.name, count = messages.len(), "read messages");
        Ok(Value::Array(messages))
    }

    async fn reply_to_message(&self, args: ReplyToMessageArgs) -> Result<Value> {
        let url = format!("{}/channels/{}/messages", self.api_base, args.channel_id);

        let (content, was_truncated) = truncate_chars(&args.text, MAX_MESSAGE_CHARS);
        if was_truncated {
            tracing::warn!(
                message_id = %args.message_id,
                limit = MAX_MESSAGE_CHARS,
                "reply exceeds Discord limit, truncating"
            );
        }

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.authorization())
            .json(&json!({
                "content": content,
                "message_reference": { "message_id": args.message_id },
                "allowed_mentions": { "replied_user": true },
            }))
            .send()
            .await
            .map_err(|error| self.failure(REPLY_TO_MESSAGE, error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self
                .failure(REPLY_TO_MESSAGE, format!("HTTP {status}: {}", truncate(&body, 200)))
                .into());
        }

        tracing::debug!(connection = %self.name, message_id = %args.message_id, "reply posted");
        Ok(Value::Bool(true))
    }
}

impl Connection for DiscordConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &'static [ActionSpec] {
        FEED_ACTIONS
    }

    fn is_configured(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.trim().is_empty())
    }

    async fn perform(&self, action: &str, args: Value) -> Result<Value> {
        match decode_action(&self.name, action, args)? {
            FeedAction::ReadMessages(args) => self.read_messages(args).await,
            FeedAction::ReplyToMessage(args) => self.reply_to_message(args).await,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    truncate_chars(text, max_chars).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_only_with_a_token() {
        let config = ConnectionConfig {
            name: "discord".into(),
            options: serde_json::Map::new(),
        };

        let without = DiscordConnection::from_config(&config, &|_| None).expect("builds");
        assert!(!Connection::is_configured(&without));

        let with = DiscordConnection::from_config(&config, &|key| {
            (key == "DISCORD_TOKEN").then(|| "secret".to_string())
        })
        .expect("builds");
        assert!(Connection::is_configured(&with));
        assert_eq!(with.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn truncates_on_character_boundaries() {
        let (text, was_truncated) = truncate_chars("ab→cd", 3);
        assert!(was_truncated);
        assert_eq!(text, "ab→");

        let (text, was_truncated) = truncate_chars("short", 10);
        assert!(!was_truncated);
        assert_eq!(text, "short");
    }
}
