//! replybot: an autonomous agent that answers new messages in a single channel,
//! at most once per message.

pub mod agent;
pub mod config;
pub mod connections;
pub mod db;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod memory;

pub use error::{Error, Result};

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Opaque message identifier in the channel's native ordering.
///
/// Snowflake-style ids (all ASCII digits) compare numerically so that `"10"`
/// sorts after `"9"`. Anything else falls back to plain string ordering.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Sentinel used when the channel had no messages at startup.
    pub fn zero() -> Self {
        Self("0".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.numeric_digits() == Some("")
    }

    /// Digits with leading zeros stripped, or None for non-numeric ids.
    fn numeric_digits(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|byte| byte.is_ascii_digit()) {
            Some(self.0.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        // All-digit ids sort before every other id so mixed feeds stay totally ordered.
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(left), Some(right)) => {
                left.len().cmp(&right.len()).then_with(|| left.cmp(right))
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MessageId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MessageId {}

impl Hash for MessageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.numeric_digits() {
            Some(digits) => digits.hash(state),
            None => self.0.hash(state),
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Feeds disagree on whether ids are JSON strings or numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => MessageId(text),
            RawId::Number(number) => MessageId(number.to_string()),
        })
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A message fetched from the feed. Lives for a single processing pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Filled in by the registry after a fetch; feeds usually omit it.
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "message", alias = "content")]
    pub body: String,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_ids_compare_numerically() {
        assert!(MessageId::new("10") > MessageId::new("9"));
        assert!(MessageId::new("1200000000000000000") > MessageId::new("999999999999999999"));
        assert_eq!(MessageId::new("007"), MessageId::new("7"));
    }

    #[test]
    fn sentinel_is_below_every_real_id() {
        let zero = MessageId::zero();
        assert!(zero.is_zero());
        assert!(MessageId::new("1") > zero);
        assert!(!MessageId::new("1").is_zero());
    }

    #[test]
    fn non_numeric_ids_compare_lexically() {
        assert!(MessageId::new("msg-b") > MessageId::new("msg-a"));
    }

    #[test]
    fn mixed_ids_are_totally_ordered() {
        let nine = MessageId::new("9");
        let ten = MessageId::new("10");
        let mixed = MessageId::new("1a");

        assert!(nine < ten);
        assert!(ten < mixed);
        assert!(nine < mixed);

        let mut ids = vec![mixed.clone(), ten.clone(), MessageId::new("msg"), nine.clone()];
        ids.sort();
        assert_eq!(ids, vec![nine, ten, mixed, MessageId::new("msg")]);
    }

    #[test]
    fn message_accepts_numeric_ids_and_legacy_body_key() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": 42,
            "author": "alice",
            "message": "hello there",
        }))
        .expect("message should decode");

        assert_eq!(message.id, MessageId::new("42"));
        assert_eq!(message.body, "hello there");
        assert!(message.channel_id.is_empty());
    }
}
