//! # Cadence — Automation & Sync Engine
//!
//! Runs the event-driven automation orchestrator and the polling sync
//! scheduler for a business-operations platform.
//!
//! Usage:
//!   cadence                                   # Run the engine
//!   cadence --config ./cadence.toml           # Custom config file
//!   cadence test-rule --rule <id> --event-type rock/status.changed \
//!       --data '{"rock_id":"r1","new_status":"off_track"}'
//!   cadence sync-now --source <id>            # Trigger one sync manually

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_automation::{ActionDispatcher, EventBus, Orchestrator, bus};
use cadence_channels::{ChatClient, FileUserDirectory, HttpDocumentProducer};
use cadence_core::CadenceConfig;
use cadence_core::config::{ChatChannelConfig, DocumentProducerConfig};
use cadence_core::TriggerEvent;
use cadence_store::EngineDb;
use cadence_sync::{
    ConfigCredentialResolver, RestProviderAdapter, SyncCause, SyncExecutor, scanner,
};

#[derive(Parser)]
#[command(name = "cadence", version, about = "⚡ Cadence — Automation & Sync Engine")]
struct Cli {
    /// Config file path (default ~/.cadence/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one rule against supplied event data, without a live event
    TestRule {
        /// Rule ID
        #[arg(long)]
        rule: String,
        /// Trigger event type (wire string, e.g. "rock/status.changed")
        #[arg(long)]
        event_type: String,
        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Run one data source's sync immediately
    SyncNow {
        /// Data source registration ID
        #[arg(long)]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cadence=debug,cadence_automation=debug,cadence_sync=debug,cadence_store=debug"
    } else {
        "cadence=info,cadence_automation=info,cadence_sync=info,cadence_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CadenceConfig::load_from(path)?,
        None => CadenceConfig::load()?,
    };

    if let Some(parent) = config.store.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(EngineDb::open(&config.store.db_path)?);

    match cli.command {
        Some(Command::TestRule {
            rule,
            event_type,
            data,
        }) => {
            let trigger = TriggerEvent::parse(&event_type)
                .ok_or_else(|| anyhow::anyhow!("unknown event type '{event_type}'"))?;
            let payload: serde_json::Value = serde_json::from_str(&data)?;

            let orchestrator = build_orchestrator(&config, db);
            let record = orchestrator.run_test(&rule, trigger, payload).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Some(Command::SyncNow { source }) => {
            let registration = db
                .registration(&source)?
                .ok_or_else(|| anyhow::anyhow!("unknown data source '{source}'"))?;

            let executor = build_executor(&config, db.clone());
            let report = executor.run(registration, SyncCause::Manual).await;
            println!("{}", serde_json::to_string_pretty(&report.run)?);
            Ok(())
        }
        None => serve(config, db).await,
    }
}

/// Run the engine: event bus consumer plus the sync scheduler loop.
async fn serve(config: CadenceConfig, db: Arc<EngineDb>) -> Result<()> {
    tracing::info!("🚀 Cadence engine starting");
    db.cancel_orphaned_runs()?;

    let orchestrator = Arc::new(build_orchestrator(&config, db.clone()));
    let (event_bus, rx) = EventBus::new(256);
    tokio::spawn(bus::run_consumer(rx, orchestrator));

    let executor = Arc::new(build_executor(&config, db.clone()));
    let scheduler = scanner::spawn_scheduler(
        db,
        executor,
        config.scheduler.tick_secs,
        config.scheduler.scan_batch_size,
    );

    tracing::info!("✅ Cadence engine running (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;
    tracing::info!("📨 Shutdown requested, stopping");

    scheduler.abort();
    drop(event_bus);
    Ok(())
}

/// Wire the channel adapters and the orchestrator onto the store.
fn build_orchestrator(config: &CadenceConfig, db: Arc<EngineDb>) -> Orchestrator {
    let chat_config = config
        .channels
        .chat
        .clone()
        .unwrap_or_else(|| ChatChannelConfig {
            api_url: String::new(),
            enabled: false,
            workspace_tokens: Default::default(),
        });
    let chat = ChatClient::new(chat_config.clone());
    for (tenant_id, token) in &chat_config.workspace_tokens {
        chat.register_tenant(tenant_id, token);
    }

    let directory_path = config
        .channels
        .directory_path
        .clone()
        .unwrap_or_else(|| CadenceConfig::home_dir().join("directory.json"));
    let directory = match FileUserDirectory::open(&directory_path) {
        Ok(directory) => directory,
        Err(e) => {
            tracing::warn!(
                "⚠️ User directory {} unreadable ({e}), direct messages will not resolve",
                directory_path.display()
            );
            FileUserDirectory::empty(&directory_path)
        }
    };

    let docs_config = config
        .channels
        .documents
        .clone()
        .unwrap_or_else(|| DocumentProducerConfig {
            render_url: String::new(),
            upload_url: String::new(),
            enabled: false,
        });
    let documents = HttpDocumentProducer::new(docs_config);

    let dispatcher =
        ActionDispatcher::new(Arc::new(chat), Arc::new(directory), Arc::new(documents));
    Orchestrator::new(db.clone(), db, dispatcher)
}

/// Wire the sync executor with the configured provider endpoints.
fn build_executor(config: &CadenceConfig, db: Arc<EngineDb>) -> SyncExecutor {
    let credentials = Arc::new(ConfigCredentialResolver::new(&config.sync));
    let mut executor =
        SyncExecutor::new(db, credentials, config.scheduler.max_concurrent_syncs);
    for (name, endpoint) in &config.sync.providers {
        executor.register_provider(Arc::new(RestProviderAdapter::new(name, &endpoint.fetch_url)));
    }
    executor
}
