//! AgentLoop: drives the message processor on a fixed interval.
//!
//! Ticks run strictly one after another. A failed tick is logged and followed
//! by a short backoff; only errors that no retry can fix (bad configuration,
//! an unknown connection) end the loop. Shutdown is observed between ticks, so
//! a tick in flight always runs to completion.

use crate::agent::composer::ReplyComposer;
use crate::agent::processor::{MessageProcessor, ProcessorSettings, SelfFilter};
use crate::config::AgentConfig;
use crate::connections::ConnectionRegistry;
use crate::dedup::DedupStore;
use crate::error::{ConnectionError, GenerationError, Result};
use crate::memory::ContextRetriever;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ERROR_BACKOFF: Duration = Duration::from_secs(2);
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing for the loop and its housekeeping.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub loop_delay: Duration,
    pub error_backoff: Duration,
    /// Dedup records older than this are swept.
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            loop_delay: config.loop_delay(),
            error_backoff: ERROR_BACKOFF,
            retention: config.retention(),
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// The first configured connection that can generate text.
pub fn select_model_provider(registry: &ConnectionRegistry) -> Result<String> {
    registry
        .list_model_providers()
        .into_iter()
        .find(|name| registry.is_configured(name))
        .ok_or_else(|| GenerationError::NoModelProvider.into())
}

pub struct AgentLoop {
    processor: MessageProcessor,
    dedup: DedupStore,
    settings: LoopSettings,
}

impl AgentLoop {
    pub fn new(processor: MessageProcessor, dedup: DedupStore, settings: LoopSettings) -> Self {
        Self {
            processor,
            dedup,
            settings,
        }
    }

    /// Wire an agent from its descriptor. Fails when the feed is missing or
    /// unconfigured, or when no model provider is usable.
    pub fn from_config(
        config: &AgentConfig,
        channel_id: &str,
        registry: Arc<ConnectionRegistry>,
        dedup: DedupStore,
        retriever: Arc<dyn ContextRetriever>,
    ) -> Result<Self> {
        if !registry.contains(&config.feed) {
            return Err(ConnectionError::UnknownConnection(config.feed.clone()).into());
        }
        if !registry.is_configured(&config.feed) {
            return Err(ConnectionError::NotConfigured(config.feed.clone()).into());
        }

        let model_provider = select_model_provider(&registry)?;
        tracing::info!(agent = %config.name, %model_provider, "model provider selected");

        let composer = ReplyComposer::new(
            config.name.clone(),
            config.bio.clone(),
            config.reply_char_limit,
            model_provider,
        )?;
        let processor = MessageProcessor::new(
            registry,
            dedup.clone(),
            retriever,
            composer,
            SelfFilter::new(config.handle(), config.account_markers.clone()),
            ProcessorSettings::from_config(config, channel_id),
        );

        Ok(Self::new(processor, dedup, LoopSettings::from_config(config)))
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let channel_id = self.processor.settings().channel_id.clone();

        tokio::pin!(shutdown);

        // Without a successful first read there is no safe watermark, and
        // starting from zero would answer the whole history.
        let mut watermark = loop {
            match self.processor.initial_watermark().await {
                Ok(watermark) => break watermark,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::warn!(%error, %channel_id, "startup read failed, retrying");
                    tokio::select! {
                        _ = &mut shutdown => {
                            tracing::info!(%channel_id, "shutdown requested before startup");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        };
        tracing::info!(%channel_id, %watermark, "agent loop started");

        self.sweep().await;
        let mut last_sweep = Instant::now();

        loop {
            let pause = match self.processor.process_new_messages(&mut watermark).await {
                Ok(report) => {
                    if report.replied > 0 || report.failed > 0 {
                        tracing::info!(
                            fetched = report.fetched,
                            replied = report.replied,
                            duplicates = report.duplicates,
                            failed = report.failed,
                            %watermark,
                            "tick complete"
                        );
                    } else {
                        tracing::debug!(fetched = report.fetched, %watermark, "tick complete");
                    }
                    self.settings.loop_delay
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, %channel_id, "agent loop stopping");
                    return Err(error);
                }
                Err(error) => {
                    tracing::error!(%error, %channel_id, "tick failed");
                    self.settings.error_backoff
                }
            };

            if last_sweep.elapsed() >= self.settings.sweep_interval {
                self.sweep().await;
                last_sweep = Instant::now();
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(
                        %channel_id,
                        %watermark,
                        "shutdown requested, agent loop stopped"
                    );
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn sweep(&self) {
        match self.dedup.retention_sweep(self.settings.retention).await {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, "swept expired dedup records"),
            Err(error) => tracing::warn!(%error, "dedup retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::actions::{
        FEED_ACTIONS, FeedAction, GENERATION_ACTIONS, GenerationAction, decode_action,
    };
    use crate::connections::{ActionSpec, Connection};
    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Empty on the first read, then one new message.
    struct QuietThenBusyFeed {
        reads: AtomicUsize,
        replies: Arc<Mutex<Vec<String>>>,
    }

    impl Connection for QuietThenBusyFeed {
        fn name(&self) -> &str {
            "discord"
        }

        fn actions(&self) -> &'static [ActionSpec] {
            FEED_ACTIONS
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn perform(&self, action: &str, args: Value) -> Result<Value> {
            match decode_action("discord", action, args)? {
                FeedAction::ReadMessages(_) => {
                    if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(json!([]))
                    } else {
                        Ok(json!([{ "id": "7", "author": "alice", "body": "anyone around?" }]))
                    }
                }
                FeedAction::ReplyToMessage(args) => {
                    self.replies.lock().expect("replies lock").push(args.message_id);
                    Ok(json!(true))
                }
            }
        }
    }

    /// Unreachable on the first read, then shows two old messages.
    struct FlakyHistoryFeed {
        reads: Arc<AtomicUsize>,
        replies: Arc<Mutex<Vec<String>>>,
    }

    impl Connection for FlakyHistoryFeed {
        fn name(&self) -> &str {
            "discord"
        }

        fn actions(&self) -> &'static [ActionSpec] {
            FEED_ACTIONS
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn perform(&self, action: &str, args: Value) -> Result<Value> {
            match decode_action("discord", action, args)? {
                FeedAction::ReadMessages(_) => {
                    if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(ConnectionError::FeedFetch {
                            connection: "discord".into(),
                            message: "connection reset".into(),
                        }
                        .into());
                    }
                    Ok(json!([
                        { "id": "11", "author": "bob", "body": "still there?" },
                        { "id": "10", "author": "alice", "body": "hello?" }
                    ]))
                }
                FeedAction::ReplyToMessage(args) => {
                    self.replies.lock().expect("replies lock").push(args.message_id);
                    Ok(json!(true))
                }
            }
        }
    }

    struct Model {
        name: &'static str,
        configured: bool,
    }

    impl Connection for Model {
        fn name(&self) -> &str {
            self.name
        }

        fn actions(&self) -> &'static [ActionSpec] {
            GENERATION_ACTIONS
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn perform(&self, action: &str, args: Value) -> Result<Value> {
            let GenerationAction::GenerateText(_) = decode_action(self.name, action, args)?;
            Ok(json!("I'm here."))
        }
    }

    struct NoContext;

    impl ContextRetriever for NoContext {
        fn retrieve<'a>(&'a self, _query: &'a str, _limit: usize) -> BoxFuture<'a, Vec<String>> {
            Box::pin(async { Vec::new() })
        }
    }

    fn agent_config() -> AgentConfig {
        AgentConfig::from_value(
            json!({
                "name": "ZeRecall",
                "bio": ["You are ZeRecall."],
                "traits": [],
                "examples": [],
                "loop_delay": 0.005,
                "config": [{ "name": "discord" }, { "name": "openai" }]
            }),
            "test",
        )
        .expect("valid descriptor")
    }

    async fn dedup_store() -> DedupStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = DedupStore::new(pool);
        store.initialize().await.expect("dedup schema");
        store
    }

    #[test]
    fn first_configured_provider_wins() {
        let mut registry = ConnectionRegistry::new();
        registry
            .register(Model { name: "local", configured: false })
            .expect("register");
        registry
            .register(Model { name: "openai", configured: true })
            .expect("register");
        registry
            .register(Model { name: "backup", configured: true })
            .expect("register");

        assert_eq!(select_model_provider(&registry).expect("provider"), "openai");
    }

    #[tokio::test]
    async fn missing_model_provider_is_fatal_at_startup() {
        let mut registry = ConnectionRegistry::new();
        registry
            .register(QuietThenBusyFeed {
                reads: AtomicUsize::new(0),
                replies: Arc::default(),
            })
            .expect("register feed");

        let result = AgentLoop::from_config(
            &agent_config(),
            "chan-1",
            Arc::new(registry),
            dedup_store().await,
            Arc::new(NoContext),
        );

        let error = result.err().expect("startup must fail");
        assert!(error.is_fatal());
        assert!(error.to_string().contains("model provider"));
    }

    #[tokio::test]
    async fn missing_feed_is_fatal_at_startup() {
        let mut registry = ConnectionRegistry::new();
        registry
            .register(Model { name: "openai", configured: true })
            .expect("register model");

        let result = AgentLoop::from_config(
            &agent_config(),
            "chan-1",
            Arc::new(registry),
            dedup_store().await,
            Arc::new(NoContext),
        );

        assert!(result.err().expect("startup must fail").is_fatal());
    }

    #[tokio::test]
    async fn replies_once_to_a_new_message_then_stops_on_shutdown() {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ConnectionRegistry::new();
        registry
            .register(QuietThenBusyFeed {
                reads: AtomicUsize::new(0),
                replies: replies.clone(),
            })
            .expect("register feed");
        registry
            .register(Model { name: "openai", configured: true })
            .expect("register model");

        let agent = AgentLoop::from_config(
            &agent_config(),
            "chan-1",
            Arc::new(registry),
            dedup_store().await,
            Arc::new(NoContext),
        )
        .expect("agent wires up");

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        tokio::time::timeout(Duration::from_secs(5), agent.run(shutdown))
            .await
            .expect("loop should observe shutdown")
            .expect("loop should stop cleanly");

        assert_eq!(*replies.lock().expect("replies lock"), vec!["7".to_string()]);
    }

    #[tokio::test]
    async fn retries_startup_read_instead_of_answering_history() {
        let reads = Arc::new(AtomicUsize::new(0));
        let replies = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ConnectionRegistry::new();
        registry
            .register(FlakyHistoryFeed {
                reads: reads.clone(),
                replies: replies.clone(),
            })
            .expect("register feed");
        registry
            .register(Model { name: "openai", configured: true })
            .expect("register model");

        let mut agent = AgentLoop::from_config(
            &agent_config(),
            "chan-1",
            Arc::new(registry),
            dedup_store().await,
            Arc::new(NoContext),
        )
        .expect("agent wires up");
        agent.settings.error_backoff = Duration::from_millis(5);

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        tokio::time::timeout(Duration::from_secs(5), agent.run(shutdown))
            .await
            .expect("loop should observe shutdown")
            .expect("loop should stop cleanly");

        assert!(reads.load(Ordering::SeqCst) >= 3);
        assert!(replies.lock().expect("replies lock").is_empty());
    }
}
