use std::sync::Arc;
use tickstream::api::{create_router, AppState};
use tickstream::config::Config;
use tickstream::feed::{DiagnosticSampler, FeedClient, TickDecoder};
use tickstream::instruments::{FileInstrumentSource, InstrumentDirectory, MemoryBlobCache};
use tickstream::sinks::{RecentTickCache, TickBuffer, TickSink};
use tickstream::websocket::BroadcastHub;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depth of the decoder-to-dispatch channel.
const TICK_CHANNEL_DEPTH: usize = 4096;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickstream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Load the instrument directory before anything touches the feed. A
    // source failure here is fatal: without symbols there is nothing to
    // subscribe to.
    let source = Arc::new(FileInstrumentSource::new(config.instruments_file.clone()));
    let cache = Arc::new(MemoryBlobCache::new());
    let directory = Arc::new(InstrumentDirectory::new(source, cache));
    if let Err(err) = directory.load().await {
        tracing::error!(error = %err, "failed to load instrument directory");
        std::process::exit(1);
    }
    tracing::info!(
        indices = directory.index_count(),
        stocks = directory.stock_count(),
        "📇 instrument directory loaded"
    );

    let hub = Arc::new(BroadcastHub::new());
    let recent = Arc::new(RecentTickCache::new());
    let buffer = Arc::new(TickBuffer::new(config.buffer_capacity));
    let sinks: Vec<Arc<dyn TickSink>> = vec![recent.clone(), buffer.clone()];

    // Feed client: decodes upstream frames and pushes ticks into the
    // dispatch channel.
    let (tick_tx, mut tick_rx) = mpsc::channel(TICK_CHANNEL_DEPTH);
    let shutdown = CancellationToken::new();
    let decoder = TickDecoder::new(
        Arc::clone(&directory),
        DiagnosticSampler::new(config.diag_samples),
    );
    let feed = Arc::new(FeedClient::new(
        config.feed.clone(),
        decoder,
        directory.tracked_tokens(),
        tick_tx,
        shutdown.clone(),
    ));

    let feed_handle = tokio::spawn(Arc::clone(&feed).run());

    // Dispatch loop: every decoded tick fans out to the hub and the sinks.
    let dispatch_hub = Arc::clone(&hub);
    let dispatch_handle = tokio::spawn(async move {
        while let Some(tick) = tick_rx.recv().await {
            dispatch_hub.broadcast(&tick);
            for sink in &sinks {
                sink.on_tick(&tick);
            }
        }
        tracing::info!("tick dispatch loop stopped");
    });

    let app = create_router(AppState {
        hub: Arc::clone(&hub),
        recent,
        buffer,
        feed: Arc::clone(&feed),
        directory,
    });

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %config.bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("🚀 tick server running on http://{}", config.bind_addr);
    tracing::info!("📊 Health check: http://{}/health", config.bind_addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws/stocks/all", config.bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
        }
    });

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    feed.shutdown();
    shutdown.cancel();

    let _ = feed_handle.await;
    drop(feed);
    let _ = dispatch_handle.await;
    tracing::info!("👋 shutdown complete");
}
