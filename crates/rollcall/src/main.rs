use anyhow::{Context, Result};
use clap::Parser;
use rollcall::dispatch::Dispatcher;
use rollcall::encoder::HttpFaceEncoder;
use rollcall::gallery::GalleryStore;
use rollcall::ledger::{MemoryLedger, SystemClock};
use rollcall::matcher::GalleryMatcher;
use rollcall::pipeline::{Pipeline, PipelineSettings};
use rollcall::pool::WorkerPool;
use rollcall::registry::DeviceRegistry;
use rollcall::{telemetry, web};
use rollconf::RollConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Attendance server for edge cameras
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./rollcall.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP gRPC endpoint (e.g. "127.0.0.1:4317"); empty disables export
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = RollConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.infra.bind.http_port = port;
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.infra.telemetry.otlp_endpoint = endpoint;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry_guard = telemetry::init(&config.infra.telemetry)
        .context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!(path = %file.display(), "Loaded config file");
    }
    for var in &sources.env_overrides {
        tracing::info!(var = %var, "Config override from environment");
    }

    let state_dir = &config.infra.paths.state_dir;
    std::fs::create_dir_all(state_dir).context("Failed to create state directory")?;
    tracing::info!("Using state directory: {}", state_dir.display());

    let boot = &config.bootstrap;

    tracing::info!("📚 Loading gallery...");
    let gallery = Arc::new(
        GalleryStore::open(&config.infra.paths.gallery_file).context("Failed to load gallery")?,
    );
    tracing::info!("   {} entities from {}", gallery.snapshot().len(), gallery.path().display());

    let encoder = HttpFaceEncoder::new(&boot.models.face_encoder, tokio::runtime::Handle::current())
        .context("Failed to create face encoder client")?;
    tracing::info!("   Face encoder: {}", encoder.endpoint());
    let matcher = Arc::new(GalleryMatcher::new(
        encoder,
        gallery.clone(),
        boot.recognition.tolerance,
    ));

    tracing::info!("🗒️  Opening attendance ledger...");
    let ledger = Arc::new(
        MemoryLedger::open(state_dir.join("attendance.json"), Arc::new(SystemClock))
            .await
            .context("Failed to open attendance ledger")?,
    );

    let pool = Arc::new(WorkerPool::new(
        boot.pipeline.workers,
        boot.pipeline.task_hard_cap(),
    ));
    let registry = Arc::new(DeviceRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), boot.devices.send_timeout()));
    let pipeline = Arc::new(Pipeline::new(
        matcher,
        pool.clone(),
        ledger.clone(),
        dispatcher,
        PipelineSettings::from_config(boot),
    ));

    let shutdown_token = CancellationToken::new();
    let state = web::AppState {
        registry: registry.clone(),
        pipeline: pipeline.clone(),
        ledger,
        gallery,
        pool: pool.clone(),
        channel_capacity: boot.devices.channel_capacity,
        started_at: Instant::now(),
        shutdown: shutdown_token.clone(),
    };
    let app = web::router(state, &config.infra.cors);

    let addr = config.infra.bind.addr();
    let bind_addr: SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("🎥 Rollcall listening on http://{}", addr);
    tracing::info!("   Frames: POST http://{}/api/frames", addr);
    tracing::info!("   Device sessions: ws://{}/ws/{{device_id}}", addr);
    tracing::info!("   Health: GET http://{}/api/health", addr);

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    // Periodic statistics
    let stats_registry = registry.clone();
    let stats_pool = pool.clone();
    let stats_pipeline = pipeline.clone();
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pool = stats_pool.snapshot();
                    let outcomes = stats_pipeline.stats();
                    tracing::info!(
                        devices.registered = stats_registry.count(),
                        pool.in_flight = pool.in_flight,
                        pool.queued = pool.queued,
                        frames.committed = outcomes.committed,
                        frames.cooldown = outcomes.cooldown,
                        frames.unrecognized = outcomes.unrecognized,
                        frames.no_face = outcomes.no_face,
                        frames.errors = outcomes.errors,
                        "Server statistics"
                    );
                }
                _ = stats_ct.cancelled() => {
                    break;
                }
            }
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    registry.close_all();
    if tokio::time::timeout(Duration::from_secs(10), server_handle).await.is_err() {
        tracing::warn!("HTTP server did not stop within 10s");
    }

    pool.drain().await;

    tracing::info!("Shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}
