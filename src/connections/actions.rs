//! Declared action schemas and the typed action enums they decode into.
//!
//! Every connection publishes a static list of [`ActionSpec`]s. The registry
//! checks incoming JSON arguments against the schema (field presence and
//! primitive type) before a handler ever runs; the handler then decodes the
//! validated arguments into its connection's action enum and dispatches with
//! a closed `match`.

use crate::error::ConnectionError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const READ_MESSAGES: &str = "read-messages";
pub const REPLY_TO_MESSAGE: &str = "reply-to-message";
pub const GENERATE_TEXT: &str = "generate-text";

/// Primitive argument types a schema can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Integer,
    Boolean,
    Number,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Boolean => "boolean",
            ArgType::Number => "number",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::Number => value.is_number(),
        }
    }
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A required argument of an action.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
}

/// A named action and the arguments it requires.
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub name: &'static str,
    pub args: &'static [ArgSpec],
}

impl ActionSpec {
    /// Check presence and primitive type of every required argument.
    /// Extra fields are tolerated.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        let Some(fields) = args.as_object() else {
            return Err("arguments must be a JSON object".into());
        };

        for arg in self.args {
            match fields.get(arg.name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required argument `{}`", arg.name));
                }
                Some(value) if !arg.ty.matches(value) => {
                    return Err(format!("argument `{}` must be of type {}", arg.name, arg.ty));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Actions every feed connection declares.
pub const FEED_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: READ_MESSAGES,
        args: &[
            ArgSpec { name: "channel_id", ty: ArgType::String },
            ArgSpec { name: "count", ty: ArgType::Integer },
        ],
    },
    ActionSpec {
        name: REPLY_TO_MESSAGE,
        args: &[
            ArgSpec { name: "channel_id", ty: ArgType::String },
            ArgSpec { name: "message_id", ty: ArgType::String },
            ArgSpec { name: "text", ty: ArgType::String },
        ],
    },
];

/// Actions every text-generation connection declares.
pub const GENERATION_ACTIONS: &[ActionSpec] = &[ActionSpec {
    name: GENERATE_TEXT,
    args: &[
        ArgSpec { name: "prompt", ty: ArgType::String },
        ArgSpec { name: "system_prompt", ty: ArgType::String },
    ],
}];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadMessagesArgs {
    pub channel_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyToMessageArgs {
    pub channel_id: String,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateTextArgs {
    pub prompt: String,
    pub system_prompt: String,
}

/// Requests understood by feed connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "kebab-case")]
pub enum FeedAction {
    ReadMessages(ReadMessagesArgs),
    ReplyToMessage(ReplyToMessageArgs),
}

/// Requests understood by text-generation connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "kebab-case")]
pub enum GenerationAction {
    GenerateText(GenerateTextArgs),
}

/// Decode an action name plus validated JSON args into a connection's action enum.
pub fn decode_action<T: DeserializeOwned>(
    connection: &str,
    action: &str,
    args: Value,
) -> std::result::Result<T, ConnectionError> {
    serde_json::from_value(serde_json::json!({ "action": action, "args": args })).map_err(|error| {
        ConnectionError::InvalidArguments {
            connection: connection.to_string(),
            action: action.to_string(),
            reason: error.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> &'static ActionSpec {
        FEED_ACTIONS
            .iter()
            .chain(GENERATION_ACTIONS)
            .find(|spec| spec.name == name)
            .expect("action should be declared")
    }

    #[test]
    fn rejects_missing_and_mistyped_arguments() {
        let reply = spec(REPLY_TO_MESSAGE);

        let error = reply.validate(&json!({ "bad_arg": 1 })).unwrap_err();
        assert!(error.contains("channel_id"), "unexpected error: {error}");

        let error = reply
            .validate(&json!({ "channel_id": "c", "message_id": 7, "text": "hi" }))
            .unwrap_err();
        assert!(error.contains("message_id"), "unexpected error: {error}");
        assert!(error.contains("string"), "unexpected error: {error}");

        assert!(spec(READ_MESSAGES).validate(&json!(["c", 10])).is_err());
    }

    #[test]
    fn accepts_valid_arguments_with_extras() {
        let read = spec(READ_MESSAGES);
        assert!(read.validate(&json!({ "channel_id": "c", "count": 10, "extra": true })).is_ok());
        assert!(read.validate(&json!({ "channel_id": "c", "count": 1.5 })).is_err());
    }

    #[test]
    fn decodes_into_typed_actions() {
        let action: FeedAction = decode_action(
            "feed",
            REPLY_TO_MESSAGE,
            json!({ "channel_id": "c", "message_id": "5", "text": "hello" }),
        )
        .expect("action should decode");

        assert_eq!(
            action,
            FeedAction::ReplyToMessage(ReplyToMessageArgs {
                channel_id: "c".into(),
                message_id: "5".into(),
                text: "hello".into(),
            })
        );

        let error = decode_action::<GenerationAction>("openai", READ_MESSAGES, json!({}))
            .expect_err("generation connections cannot read messages");
        assert!(matches!(error, ConnectionError::InvalidArguments { .. }));
    }
}
