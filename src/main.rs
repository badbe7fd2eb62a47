//! reelgate - resumable chunked-upload gateway for large media files

use clap::Parser;
use reelgate::api::handlers::AppState;
use reelgate::config::{Config, StorageConfig};
use reelgate::jobs::{JobDispatcher, SqliteJobQueue};
use reelgate::metrics::Metrics;
use reelgate::ratelimit::RateLimiter;
use reelgate::reaper::Reaper;
use reelgate::service::{ServiceLimits, UploadSessionService};
use reelgate::storage::{MemoryObjectStore, ObjectStore, S3ObjectStore};
use reelgate::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.4.2 (built 2026-07-18T09:12:44Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("REELGATE_BUILD_TIME"),
        )
    })
}

/// reelgate — resumable chunked-upload gateway for large media files
#[derive(Parser, Debug)]
#[command(name = "reelgate")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run interactive configuration wizard
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Interactive config wizard (runs synchronously, exits immediately)
    if cli.init {
        match reelgate::init::run_interactive_init("reelgate.toml") {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    // Initialize tracing
    // Priority: RUST_LOG > REELGATE_LOG_LEVEL > --verbose > config
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("REELGATE_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("reelgate=trace,tower_http=trace")
            } else {
                EnvFilter::new(config.log_level.clone())
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting reelgate v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("REELGATE_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Database: {:?}", config.database_path);

    match &config.storage {
        StorageConfig::Memory => {
            warn!("  Storage: in-memory (uploads are lost on restart)");
        }
        StorageConfig::S3 {
            endpoint,
            bucket,
            region,
            ..
        } => {
            info!("  Storage: S3");
            info!("  Bucket: {}", bucket);
            info!("  Region: {}", region);
            if let Some(ep) = endpoint {
                info!("  Endpoint: {}", ep);
            }
        }
    }
    info!(
        "  Max upload size: {} GiB",
        config.max_upload_bytes / 1024 / 1024 / 1024
    );
    info!("  Session TTL: {} h", config.session_ttl_hours);

    // Create Prometheus metrics
    let metrics = Arc::new(Metrics::new());
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    let storage_type = match &config.storage {
        StorageConfig::Memory => "memory",
        StorageConfig::S3 { .. } => "s3",
    };
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION"), storage_type])
        .set(1.0);

    // Wire the service graph once, explicitly; handlers receive it via state.
    let objects: Arc<dyn ObjectStore> = match &config.storage {
        StorageConfig::Memory => Arc::new(MemoryObjectStore::new()),
        s3 @ StorageConfig::S3 { .. } => Arc::new(S3ObjectStore::new(s3)?),
    };
    let store = Arc::new(SessionStore::open(&config.database_path)?);
    let queue = Arc::new(SqliteJobQueue::open(&config.database_path)?);
    let dispatcher = JobDispatcher::new(queue);

    let limits = ServiceLimits {
        max_upload_bytes: config.max_upload_bytes,
        allowed_mime_types: config
            .allowed_mime_types
            .iter()
            .map(|m| m.trim().to_ascii_lowercase())
            .collect(),
        session_ttl: chrono::Duration::hours(config.session_ttl_hours as i64),
        min_chunk_bytes: config.min_chunk_bytes,
        target_part_ceiling: config.target_part_ceiling,
        chunk_deadline: Duration::from_secs(config.chunk_deadline_seconds),
    };
    let service = UploadSessionService::new(
        store.clone(),
        objects.clone(),
        dispatcher,
        limits,
        Some(metrics.clone()),
    );

    let create_limiter = RateLimiter::new(config.rate_create_per_hour, Duration::from_secs(3600));
    let chunk_limiter = RateLimiter::new(config.rate_chunk_per_minute, Duration::from_secs(60));

    let state = Arc::new(AppState {
        service,
        metrics: Some(metrics.clone()),
        create_limiter,
        chunk_limiter,
        storage_kind: storage_type,
        started_at: std::time::Instant::now(),
    });

    // Reaper: periodic sweep of expired/stale sessions
    let reaper = Reaper::new(
        store,
        objects,
        chrono::Duration::minutes(config.stale_chunk_threshold_minutes as i64),
        Some(metrics),
    );
    reaper.spawn(Duration::from_secs(config.reaper_interval_seconds));

    // Evict idle rate-limit buckets every 10 minutes
    spawn_periodic(Duration::from_secs(600), {
        let state = state.clone();
        move || {
            state.create_limiter.evict_idle(Duration::from_secs(7200));
            state.chunk_limiter.evict_idle(Duration::from_secs(7200));
        }
    });

    let app = reelgate::api::router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("reelgate listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Spawn a background task that runs `f` every `interval`.
fn spawn_periodic(interval: Duration, f: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            f();
        }
    });
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
