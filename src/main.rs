//! replybot CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use replybot::agent::AgentLoop;
use replybot::config::{AgentConfig, EnvConfig, process_env};
use replybot::connections::ConnectionRegistry;
use replybot::db::Db;
use replybot::dedup::DedupStore;
use replybot::memory::search::split_snippets;
use replybot::memory::{FastEmbedder, SimilaritySearch};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "replybot")]
#[command(about = "An agent that answers new channel messages, once each")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reply loop until interrupted
    Run {
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Store context snippets from a file, split on blank lines
    Ingest {
        #[command(flatten)]
        agent: AgentArgs,

        file: PathBuf,
    },
    /// Delete dedup records older than the retention window
    Sweep {
        #[command(flatten)]
        agent: AgentArgs,

        /// Override the agent's retention window, in days
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(clap::Args)]
struct AgentArgs {
    /// Agent descriptor name, without extension
    #[arg(short, long)]
    agent: String,

    /// Directory holding agent descriptors
    #[arg(long, default_value = "agents")]
    agents_dir: PathBuf,
}

impl AgentArgs {
    fn load(&self) -> anyhow::Result<AgentConfig> {
        AgentConfig::load(&self.agents_dir, &self.agent)
            .with_context(|| format!("failed to load agent '{}'", self.agent))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    replybot::logging::init_tracing(cli.debug, cli.log_dir.as_deref())?;

    let env = EnvConfig::from_env();

    match cli.command {
        Command::Run { agent } => run(agent.load()?, &env).await,
        Command::Ingest { agent, file } => ingest(agent.load()?, &env, &file).await,
        Command::Sweep { agent, days } => sweep(agent.load()?, &env, days).await,
    }
}

async fn run(config: AgentConfig, env: &EnvConfig) -> anyhow::Result<()> {
    let channel_id = env.require_channel_id()?.to_string();

    let db = Db::connect(&env.database_path)
        .await
        .with_context(|| "failed to connect to database")?;

    let registry = Arc::new(
        ConnectionRegistry::from_config(&config.config, &process_env)
            .with_context(|| "failed to build connections")?,
    );
    let retriever = Arc::new(
        SimilaritySearch::open(&db.lance, FastEmbedder::new())
            .await
            .with_context(|| "failed to open context table")?,
    );

    let agent = AgentLoop::from_config(
        &config,
        &channel_id,
        registry,
        DedupStore::new(db.sqlite.clone()),
        retriever,
    )?;

    tracing::info!(agent = %config.name, %channel_id, "starting replybot");

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let result = agent.run(shutdown).await;

    db.close().await;
    result?;

    tracing::info!("replybot stopped");
    Ok(())
}

async fn ingest(config: AgentConfig, env: &EnvConfig, file: &Path) -> anyhow::Result<()> {
    let document = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let snippets = split_snippets(&document);

    let db = Db::connect(&env.database_path)
        .await
        .with_context(|| "failed to connect to database")?;
    let search = SimilaritySearch::open(&db.lance, FastEmbedder::new())
        .await
        .with_context(|| "failed to open context table")?;

    for snippet in &snippets {
        search.ingest(snippet).await?;
    }

    tracing::info!(
        agent = %config.name,
        count = snippets.len(),
        file = %file.display(),
        "context ingested"
    );
    println!("ingested {} snippets", snippets.len());

    db.close().await;
    Ok(())
}

async fn sweep(config: AgentConfig, env: &EnvConfig, days: Option<u32>) -> anyhow::Result<()> {
    let older_than = match days {
        Some(days) => chrono::Duration::days(i64::from(days)),
        None => config.retention(),
    };

    let db = Db::connect(&env.database_path)
        .await
        .with_context(|| "failed to connect to database")?;
    let deleted = DedupStore::new(db.sqlite.clone())
        .retention_sweep(older_than)
        .await?;

    println!("deleted {deleted} dedup records");

    db.close().await;
    Ok(())
}
