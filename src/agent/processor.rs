//! Message processing: one poll of the channel, turned into at-most-once replies.
//!
//! A tick fetches the newest messages, drops the agent's own and anything
//! addressed to it, keeps what is newer than the watermark, and replies to
//! the rest oldest first. The dedup ledger is consulted before every reply and
//! written after every confirmed one, so a restart that loses the watermark
//! never produces a second reply.

use crate::agent::composer::ReplyComposer;
use crate::config::AgentConfig;
use crate::connections::ConnectionRegistry;
use crate::connections::actions::REPLY_TO_MESSAGE;
use crate::dedup::DedupStore;
use crate::error::{ConnectionError, Result};
use crate::memory::ContextRetriever;
use crate::{Message, MessageId};
use std::sync::Arc;

/// Id of the newest message handled in this process lifetime.
///
/// Only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    last_processed: MessageId,
}

impl Watermark {
    pub fn new(last_processed: MessageId) -> Self {
        Self { last_processed }
    }

    /// The sentinel watermark for a channel with no history.
    pub fn zero() -> Self {
        Self::new(MessageId::zero())
    }

    pub fn get(&self) -> &MessageId {
        &self.last_processed
    }

    pub fn is_new(&self, id: &MessageId) -> bool {
        *id > self.last_processed
    }

    /// Move to `id` if it is newer. Returns whether the watermark moved.
    pub fn advance(&mut self, id: &MessageId) -> bool {
        if self.is_new(id) {
            self.last_processed = id.clone();
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.last_processed)
    }
}

/// Recognizes messages the agent must not answer: its own posts and
/// messages that mention it.
#[derive(Debug, Clone)]
pub struct SelfFilter {
    handle: String,
    account_markers: Vec<String>,
}

impl SelfFilter {
    pub fn new(handle: impl Into<String>, account_markers: Vec<String>) -> Self {
        Self {
            handle: handle.into().trim().trim_start_matches('@').to_lowercase(),
            account_markers: account_markers
                .into_iter()
                .filter(|marker| !marker.is_empty())
                .collect(),
        }
    }

    pub fn is_self_related(&self, message: &Message) -> bool {
        if self
            .account_markers
            .iter()
            .any(|marker| message.author.contains(marker.as_str()))
        {
            return true;
        }

        if self.handle.is_empty() {
            return false;
        }

        if message.author.to_lowercase().contains(&self.handle) {
            return true;
        }

        // `@handle` also covers the `<@handle>` reply-reference form.
        message
            .body
            .to_lowercase()
            .contains(&format!("@{}", self.handle))
    }
}

/// Per-channel settings for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub feed_connection: String,
    pub channel_id: String,
    pub read_count: u32,
    pub context_limit: usize,
}

impl ProcessorSettings {
    pub fn from_config(config: &AgentConfig, channel_id: impl Into<String>) -> Self {
        Self {
            feed_connection: config.feed.clone(),
            channel_id: channel_id.into(),
            read_count: config.message_read_count,
            context_limit: config.context_limit,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub candidates: usize,
    pub replied: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Runs the fetch → filter → reply pipeline for a single channel.
pub struct MessageProcessor {
    registry: Arc<ConnectionRegistry>,
    dedup: DedupStore,
    retriever: Arc<dyn ContextRetriever>,
    composer: ReplyComposer,
    self_filter: SelfFilter,
    settings: ProcessorSettings,
}

impl MessageProcessor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dedup: DedupStore,
        retriever: Arc<dyn ContextRetriever>,
        composer: ReplyComposer,
        self_filter: SelfFilter,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            registry,
            dedup,
            retriever,
            composer,
            self_filter,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// The newest messages, newest first.
    ///
    /// Feed failures are logged and read as an empty channel; registry
    /// misuse is returned because retrying cannot fix it.
    pub async fn fetch(&self) -> Result<Vec<Message>> {
        let result = self
            .registry
            .read_messages(
                &self.settings.feed_connection,
                &self.settings.channel_id,
                self.settings.read_count,
            )
            .await;

        match result {
            Ok(messages) => Ok(messages),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                tracing::warn!(
                    %error,
                    channel_id = %self.settings.channel_id,
                    "failed to read messages, treating channel as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Start from the newest message already in the channel so history is
    /// never answered, or from the sentinel for an empty channel.
    ///
    /// Unlike a tick's fetch, a failed read is returned: an unreachable feed
    /// must not be mistaken for an empty channel here.
    pub async fn initial_watermark(&self) -> Result<Watermark> {
        let messages = self
            .registry
            .read_messages(
                &self.settings.feed_connection,
                &self.settings.channel_id,
                self.settings.read_count,
            )
            .await?;

        Ok(messages
            .iter()
            .map(|message| &message.id)
            .max()
            .cloned()
            .map(Watermark::new)
            .unwrap_or_else(Watermark::zero))
    }

    /// Oldest-first messages that are newer than the watermark and not the
    /// agent's own.
    pub fn select_candidates(
        &self,
        mut messages: Vec<Message>,
        watermark: &Watermark,
    ) -> Vec<Message> {
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        messages.dedup_by(|a, b| a.id == b.id);

        messages
            .into_iter()
            .filter(|message| watermark.is_new(&message.id))
            .filter(|message| {
                let skip = self.self_filter.is_self_related(message);
                if skip {
                    tracing::trace!(message_id = %message.id, "skipping self-related message");
                }
                !skip
            })
            .collect()
    }

    /// One tick. The watermark moves past a message only once it is handled,
    /// and never past a message that failed this tick.
    pub async fn process_new_messages(&self, watermark: &mut Watermark) -> Result<TickReport> {
        let messages = self.fetch().await?;
        let mut report = TickReport {
            fetched: messages.len(),
            ..TickReport::default()
        };

        let candidates = self.select_candidates(messages, watermark);
        report.candidates = candidates.len();

        // Once a message fails, later ones may still be answered and recorded,
        // but the watermark holds so the failed one is retried next tick.
        let mut blocked = false;
        let channel_id = &self.settings.channel_id;

        for message in candidates {
            match self.dedup.has_replied(channel_id, &message.id).await {
                Ok(true) => {
                    tracing::debug!(message_id = %message.id, "already replied, skipping");
                    report.duplicates += 1;
                    if !blocked {
                        watermark.advance(&message.id);
                    }
                    continue;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        %error,
                        message_id = %message.id,
                        "dedup lookup failed, will retry"
                    );
                    report.failed += 1;
                    blocked = true;
                    continue;
                }
            }

            match self.reply_to(&message).await {
                Ok(()) => {
                    report.replied += 1;
                    tracing::info!(message_id = %message.id, author = %message.author, "replied");

                    if let Err(error) = self.dedup.record_replied(channel_id, &message.id).await {
                        tracing::error!(
                            %error,
                            message_id = %message.id,
                            "reply sent but not recorded, it may be repeated after a restart"
                        );
                    }
                    if !blocked {
                        watermark.advance(&message.id);
                    }
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::warn!(%error, message_id = %message.id, "failed to reply, will retry");
                    report.failed += 1;
                    blocked = true;
                }
            }
        }

        Ok(report)
    }

    async fn reply_to(&self, message: &Message) -> Result<()> {
        let context = self
            .retriever
            .retrieve(&message.body, self.settings.context_limit)
            .await;

        let reply = self
            .composer
            .generate_reply(&self.registry, &message.body, &context)
            .await?;

        let sent = self
            .registry
            .reply_to_message(
                &self.settings.feed_connection,
                &self.settings.channel_id,
                &message.id,
                &reply,
            )
            .await?;

        if !sent {
            return Err(ConnectionError::ActionFailed {
                connection: self.settings.feed_connection.clone(),
                action: REPLY_TO_MESSAGE.to_string(),
                message: "feed reported the reply as not sent".into(),
            }
            .into());
        }

        Ok(())
    }
}
