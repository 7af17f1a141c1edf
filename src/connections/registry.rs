//! ConnectionRegistry: name → connection lookup and validated action dispatch.

use crate::config::{ConnectionConfig, EnvLookup};
use crate::connections::actions::{
    GENERATE_TEXT, GenerateTextArgs, READ_MESSAGES, REPLY_TO_MESSAGE, ReadMessagesArgs,
    ReplyToMessageArgs,
};
use crate::connections::discord::DiscordConnection;
use crate::connections::openai::OpenAiConnection;
use crate::connections::traits::{Connection, ConnectionDyn};
use crate::error::{ConfigError, ConnectionError, Result};
use crate::{Message, MessageId};
use anyhow::Context as _;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Holds every connection the agent was configured with, in registration order.
///
/// Built once at startup; the map never changes afterwards.
pub struct ConnectionRegistry {
    connections: Vec<Arc<dyn ConnectionDyn>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    /// Build the registry from the agent descriptor's connection list.
    pub fn from_config(connections: &[ConnectionConfig], env: EnvLookup<'_>) -> Result<Self> {
        let mut registry = Self::new();

        for connection in connections {
            match connection.name.as_str() {
                "discord" => registry.register(DiscordConnection::from_config(connection, env)?)?,
                "openai" => registry.register(OpenAiConnection::from_config(connection, env)?)?,
                other => {
                    return Err(
                        ConfigError::Invalid(format!("unsupported connection: {other}")).into(),
                    );
                }
            }
        }

        Ok(registry)
    }

    /// Register a connection. Names must be unique.
    pub fn register(&mut self, connection: impl Connection) -> Result<()> {
        let name = Connection::name(&connection).to_string();
        if self.get(&name).is_some() {
            return Err(ConfigError::Invalid(format!("duplicate connection: {name}")).into());
        }

        tracing::debug!(connection = %name, "connection registered");
        self.connections.push(Arc::new(connection));
        Ok(())
    }

    fn get(&self, connection_name: &str) -> Option<&Arc<dyn ConnectionDyn>> {
        self.connections
            .iter()
            .find(|connection| connection.name() == connection_name)
    }

    pub fn contains(&self, connection_name: &str) -> bool {
        self.get(connection_name).is_some()
    }

    /// Whether the named connection exists and reports itself configured.
    pub fn is_configured(&self, connection_name: &str) -> bool {
        self.get(connection_name)
            .is_some_and(|connection| connection.is_configured())
    }

    /// Every connection declaring text generation, in registration order.
    pub fn list_model_providers(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|connection| connection.generates_text())
            .map(|connection| connection.name().to_string())
            .collect()
    }

    /// Perform an action on a connection.
    ///
    /// Arguments are checked against the declared schema first; the handler
    /// only runs when every check passes. Its result is returned unchanged.
    pub async fn perform(
        &self,
        connection_name: &str,
        action_name: &str,
        args: Value,
    ) -> Result<Value> {
        let connection = self
            .get(connection_name)
            .ok_or_else(|| ConnectionError::UnknownConnection(connection_name.to_string()))?;

        let spec = connection
            .actions()
            .iter()
            .find(|spec| spec.name == action_name)
            .ok_or_else(|| ConnectionError::UnknownAction {
                connection: connection_name.to_string(),
                action: action_name.to_string(),
            })?;

        spec.validate(&args)
            .map_err(|reason| ConnectionError::InvalidArguments {
                connection: connection_name.to_string(),
                action: action_name.to_string(),
                reason,
            })?;

        if !connection.is_configured() {
            return Err(ConnectionError::NotConfigured(connection_name.to_string()).into());
        }

        tracing::debug!(connection = %connection_name, action = %action_name, "performing action");
        connection.perform(action_name, args).await
    }

    /// Read the newest `count` messages from a feed, newest first.
    pub async fn read_messages(
        &self,
        connection_name: &str,
        channel_id: &str,
        count: u32,
    ) -> Result<Vec<Message>> {
        let args = encode_args(&ReadMessagesArgs {
            channel_id: channel_id.to_string(),
            count,
        })?;
        let value = self.perform(connection_name, READ_MESSAGES, args).await?;

        let mut messages: Vec<Message> =
            serde_json::from_value(value).map_err(|error| ConnectionError::ActionFailed {
                connection: connection_name.to_string(),
                action: READ_MESSAGES.to_string(),
                message: format!("unexpected result shape: {error}"),
            })?;

        for message in &mut messages {
            if message.channel_id.is_empty() {
                message.channel_id = channel_id.to_string();
            }
        }

        Ok(messages)
    }

    /// Post `text` as a reply. Returns whether the feed reported success.
    pub async fn reply_to_message(
        &self,
        connection_name: &str,
        channel_id: &str,
        message_id: &MessageId,
        text: &str,
    ) -> Result<bool> {
        let args = encode_args(&ReplyToMessageArgs {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        })?;
        let value = self.perform(connection_name, REPLY_TO_MESSAGE, args).await?;

        Ok(is_truthy(&value))
    }

    /// Turn a prompt pair into text.
    pub async fn generate_text(
        &self,
        connection_name: &str,
        prompt: &str,
        system_prompt: &str,
    ) -> Result<String> {
        let args = encode_args(&GenerateTextArgs {
            prompt: prompt.to_string(),
            system_prompt: system_prompt.to_string(),
        })?;
        let value = self.perform(connection_name, GENERATE_TEXT, args).await?;

        match value {
            Value::String(text) => Ok(text),
            other => Err(ConnectionError::ActionFailed {
                connection: connection_name.to_string(),
                action: GENERATE_TEXT.to_string(),
                message: format!("expected text, got {other}"),
            }
            .into()),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_args(args: &impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(args).context("failed to encode action arguments")?)
}

/// Feeds answer a reply with a flag or the created object; both count as success.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
