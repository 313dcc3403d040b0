//! Tick Pipeline Binary
//!
//! Starts the feed ingestor, one pipeline worker per partition, and the
//! HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-pipeline
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_TOKEN`: Finnhub API token (only when `FEED_ENABLED=true`)
//!
//! ## Optional
//! - `FINNHUB_SYMBOLS`: Comma-separated symbols to subscribe to
//! - `FEED_ENABLED`: Run the feed client (default: true)
//! - `PIPELINE_PARTITIONS`: Queue partitions and workers (default: 1)
//! - `PIPELINE_STRATEGY`: independent | atomic (default: independent)
//! - `STORE_BACKEND`: sqlite | memory (default: sqlite)
//! - `STORE_DATABASE_PATH`: SQLite file (default: trades.db)
//! - `API_PORT`: HTTP port (default: 8080)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! # Shutdown
//!
//! On SIGINT or SIGTERM the feed and HTTP server stop, the queue is closed,
//! and workers drain it for up to 20 seconds before they are cancelled.
//! Anything still queued after that is lost and logged.

use std::sync::Arc;
use std::time::Duration;

use tick_pipeline::infrastructure::finnhub::{FeedEvent, FeedState, FinnhubClient, FinnhubClientConfig};
use tick_pipeline::infrastructure::http::{AppState, HttpServer, PipelineStatus};
use tick_pipeline::infrastructure::persistence::{InMemoryTradeStore, SqliteTradeStore};
use tick_pipeline::infrastructure::queue::InMemoryQueue;
use tick_pipeline::infrastructure::telemetry;
use tick_pipeline::{
    PipelineConfig, PipelineCoordinator, PipelineWorker, StoreBackend, StoreSettings,
    TradeQueryService, TradeStore, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long workers may keep draining a closed queue before they are
/// cancelled. Shorter than `SHUTDOWN_TIMEOUT` so workers exit on their own.
const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Capacity of the feed event channel.
const FEED_EVENT_CAPACITY: usize = 1024;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting tick pipeline");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = PipelineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    match config.store.backend {
        StoreBackend::Sqlite => {
            let Some(store) = open_sqlite_store(&config.store, &shutdown_token).await else {
                tracing::info!("Shutdown requested before the store opened");
                return Ok(());
            };
            run_pipeline(config, Arc::new(store), shutdown_token).await?;
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; trades are lost on exit");
            run_pipeline(config, Arc::new(InMemoryTradeStore::new()), shutdown_token).await?;
        }
    }

    tracing::info!("Tick pipeline stopped");
    Ok(())
}

/// Open the SQLite store, retrying until it succeeds or shutdown is requested.
async fn open_sqlite_store(
    settings: &StoreSettings,
    shutdown_token: &CancellationToken,
) -> Option<SqliteTradeStore> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match SqliteTradeStore::open(&settings.database_path) {
            Ok(store) => return Some(store),
            Err(e) => {
                tracing::warn!(
                    attempt,
                    path = %settings.database_path.display(),
                    error = %e,
                    retry_in_ms = settings.connect_retry_delay.as_millis(),
                    "Store not ready, retrying"
                );
            }
        }

        tokio::select! {
            () = shutdown_token.cancelled() => return None,
            () = tokio::time::sleep(settings.connect_retry_delay) => {}
        }
    }
}

/// Wire the queue, feed, workers, and HTTP server around `store`, then wait
/// for shutdown.
async fn run_pipeline<S>(
    config: PipelineConfig,
    store: Arc<S>,
    shutdown_token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: TradeStore + 'static,
{
    let pipeline = &config.pipeline;
    let queue = Arc::new(InMemoryQueue::new(
        pipeline.stream_name.clone(),
        pipeline.partitions,
        pipeline.queue_capacity,
    ));

    let feed_credentials = config
        .credentials
        .clone()
        .filter(|_| config.feed.enabled);
    let feed_state = Arc::new(if feed_credentials.is_some() {
        FeedState::new()
    } else {
        FeedState::disabled()
    });

    let status = Arc::new(PipelineStatus::new(
        env!("CARGO_PKG_VERSION"),
        pipeline.strategy,
        Arc::clone(&feed_state),
        Arc::clone(&queue),
    ));

    let mut tasks = JoinSet::new();

    // Spawn feed client and its event handler
    if let Some(credentials) = feed_credentials {
        if config.feed.symbols.is_empty() {
            tracing::warn!("No symbols configured; the feed will connect but publish nothing");
        }
        let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(FEED_EVENT_CAPACITY);
        let handler_state = Arc::clone(&feed_state);
        tokio::spawn(async move {
            handle_feed_events(feed_rx, handler_state).await;
        });

        let client_config = FinnhubClientConfig {
            reconnect: config.feed.reconnect_backoff(),
            ..FinnhubClientConfig::new(
                config.feed.url.clone(),
                credentials,
                config.feed.symbols.clone(),
            )
        };
        let client = Arc::new(FinnhubClient::new(
            client_config,
            Arc::clone(&queue),
            feed_tx,
            shutdown_token.clone(),
        ));
        tasks.spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(error = %e, "Feed client error");
            }
        });
    }

    // Spawn one worker per partition. Workers outlive the shutdown signal
    // long enough to drain what the feed already queued.
    let worker_token = CancellationToken::new();
    let coordinator = Arc::new(PipelineCoordinator::new(
        Arc::clone(&store),
        pipeline.strategy,
        pipeline.store_timeout,
    ));
    for partition in 0..queue.partition_count() {
        let worker = PipelineWorker::new(
            Arc::clone(&coordinator),
            queue.consumer(partition)?,
            pipeline.retry_backoff(),
            worker_token.clone(),
        );
        let worker_status = Arc::clone(&status);
        worker_status.worker_started();
        tasks.spawn(async move {
            match worker.run().await {
                Ok(stats) => tracing::info!(
                    partition,
                    processed = stats.processed,
                    acknowledged = stats.acknowledged,
                    retried = stats.retried,
                    "Pipeline worker stopped"
                ),
                Err(e) => tracing::error!(partition, error = %e, "Pipeline worker failed"),
            }
            worker_status.worker_stopped();
        });
    }

    // Spawn HTTP server
    let query = TradeQueryService::new(
        Arc::clone(&store),
        config.api.default_limit,
        pipeline.store_timeout,
    );
    let app_state = Arc::new(AppState::new(query, config.api.request_timeout, status));
    let http_server = HttpServer::new(config.api.port, app_state, shutdown_token.clone());
    tasks.spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(partitions = pipeline.partitions, "Tick pipeline ready");

    shutdown_token.cancelled().await;
    queue.close();
    tracing::info!(
        pending = queue.pending(),
        timeout_secs = QUEUE_DRAIN_TIMEOUT.as_secs(),
        "Draining queued messages"
    );
    let drain_deadline = worker_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(QUEUE_DRAIN_TIMEOUT).await;
        drain_deadline.cancel();
    });

    drain(tasks).await;
    worker_token.cancel();

    let pending = queue.pending();
    if pending > 0 {
        tracing::warn!(
            pending,
            "Unacknowledged messages dropped at shutdown; the queue is not durable"
        );
    }
    Ok(())
}

/// Handle events from the feed client.
async fn handle_feed_events(mut rx: mpsc::Receiver<FeedEvent>, feed_state: Arc<FeedState>) {
    while let Some(event) = rx.recv().await {
        feed_state.apply(&event);
        match &event {
            FeedEvent::Connected { symbols } => {
                tracing::info!(symbols, "Feed connected");
            }
            FeedEvent::Disconnected => {
                tracing::warn!("Feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Feed reconnecting");
            }
            FeedEvent::Published { partition, offset } => {
                tracing::trace!(partition, offset, "Feed frame queued");
            }
            FeedEvent::Error(msg) => {
                tracing::error!(error = %msg, "Feed error");
            }
        }
    }
}

/// Wait for spawned tasks, abandoning them after `SHUTDOWN_TIMEOUT`.
async fn drain(mut tasks: JoinSet<()>) {
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        tasks = tasks.len(),
        "Graceful shutdown started"
    );

    let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Task panicked during shutdown");
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!(remaining = tasks.len(), "Shutdown timeout elapsed, aborting tasks");
        tasks.abort_all();
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        stream = %config.pipeline.stream_name,
        partitions = config.pipeline.partitions,
        strategy = config.pipeline.strategy.as_str(),
        store = config.store.backend.as_str(),
        feed_enabled = config.feed.enabled,
        symbols = config.feed.symbols.len(),
        api_port = config.api.port,
        "Configuration loaded"
    );
    tracing::debug!(
        database_path = %config.store.database_path.display(),
        feed_url = %config.feed.url,
        store_timeout_ms = config.pipeline.store_timeout.as_millis(),
        request_timeout_ms = config.api.request_timeout.as_millis(),
        "Pipeline endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
