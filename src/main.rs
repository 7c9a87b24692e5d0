use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use assist_relay::config::RelayConfig;
use assist_relay::coordinator::{
    BatchProcessor, COMBINE_TASK, CancellationRegistry, DebounceCoordinator, PendingBuffer,
};
use assist_relay::llm::{LlmConfig, create_engine};
use assist_relay::pipeline::builtin::{LogOutput, TransportOutput};
use assist_relay::pipeline::presets::{PresetDeps, register_defaults};
use assist_relay::pipeline::{ChannelOrchestrator, ChannelRegistry, OutputHandler};
use assist_relay::store::{
    AbortBus, ConversationStore, InMemoryAbortBus, InMemoryConversationStore, InMemoryListStore,
    InMemoryProcessedIds, KeyedListStore, LibSqlBackend, ProcessedIdStore,
};
use assist_relay::tools::{StaticToolFactory, ToolFactory, builtin::CurrentTimeTool};
use assist_relay::transport::{CliTransport, Transport, ingest_routes, spawn_ingest};
use assist_relay::worker::TimerQueue;

/// Install the tracing subscriber. With `RELAY_LOG_DIR` set, logs also go to a
/// daily rolling file; the returned guard must live until exit.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("RELAY_LOG_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
    {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "assist-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = RelayConfig::from_env().context("invalid RELAY_* configuration")?;
    let llm_config = LlmConfig::from_env(config.model.clone())?;
    let engine = create_engine(&llm_config);

    eprintln!("🤖 Assist Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Debounce: {} ms", config.debounce.as_millis());

    // ── Stores ──────────────────────────────────────────────────────────
    let lists: Arc<dyn KeyedListStore>;
    let conversations: Arc<dyn ConversationStore>;
    let processed: Arc<dyn ProcessedIdStore>;
    match &config.db_path {
        Some(path) => {
            let db = Arc::new(
                LibSqlBackend::new_local(path)
                    .await
                    .with_context(|| format!("opening database at {}", path.display()))?,
            );
            eprintln!("   Database: {}", path.display());
            lists = db.clone();
            conversations = db.clone();
            processed = db;
        }
        None => {
            eprintln!("   Database: in-memory");
            lists = Arc::new(InMemoryListStore::new());
            conversations = Arc::new(InMemoryConversationStore::new());
            processed = Arc::new(InMemoryProcessedIds::new());
        }
    }
    let bus: Arc<dyn AbortBus> = Arc::new(InMemoryAbortBus::new());

    // ── Channels ────────────────────────────────────────────────────────
    let cli: Arc<dyn Transport> = Arc::new(CliTransport::new());
    let outputs: Vec<Arc<dyn OutputHandler>> = vec![
        Arc::new(TransportOutput::new(Arc::clone(&cli))),
        Arc::new(LogOutput),
    ];
    let tool_factories: Vec<Arc<dyn ToolFactory>> = vec![Arc::new(StaticToolFactory::new(
        "builtin",
        vec![Arc::new(CurrentTimeTool)],
    ))];

    let registry = Arc::new(ChannelRegistry::new());
    register_defaults(
        &registry,
        &config,
        &PresetDeps {
            conversations: Arc::clone(&conversations),
            tool_factories,
            outputs,
            mention_name: config.mention_name.clone(),
        },
    )?;
    registry.get(&config.primary_channel)?;
    eprintln!("   Channels: {}", registry.list_ids().join(", "));

    let orchestrator = Arc::new(ChannelOrchestrator::new(
        registry,
        engine,
        conversations,
    ));

    // ── Coordination ────────────────────────────────────────────────────
    let cancellations = CancellationRegistry::new();
    cancellations.start(Arc::clone(&bus)).await?;

    let queue = TimerQueue::new(config.retry.clone());
    let buffer = PendingBuffer::new(lists);
    let coordinator = Arc::new(DebounceCoordinator::new(
        buffer.clone(),
        bus,
        Arc::new(queue.clone()),
        config.debounce,
    ));
    queue.register_handler(
        COMBINE_TASK,
        Arc::new(BatchProcessor::new(
            buffer,
            Arc::clone(&coordinator),
            Arc::clone(&cancellations),
            orchestrator,
            processed,
            &config.primary_channel,
            &config.fallback_message,
        )),
    );

    // ── Transports ──────────────────────────────────────────────────────
    let cli_handle = spawn_ingest(Arc::clone(&cli), Arc::clone(&coordinator)).await?;

    if let Some(port) = config.http_port {
        let app = ingest_routes(Arc::clone(&coordinator)).layer(TraceLayer::new_for_http());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding HTTP ingest on port {port}"))?;
        eprintln!("   HTTP ingest: http://0.0.0.0:{port}/api/messages");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP ingest server stopped: {e}");
            }
        });
    }

    eprintln!("   Type a message and press Enter. Ctrl-C to exit.\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    cli_handle.abort();
    queue.shutdown().await;
    cancellations.shutdown().await;
    let _ = cli.shutdown().await;
    Ok(())
}
