use std::{
    net::SocketAddr,
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use filmfilman::{
    config::{AppConfig, DEFAULT_ENV_FILE, LogConfig},
    server::{AppState, router},
};
use tokio::{signal, time};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(about = "TMDB proxy and video link backend for FilmFilman")]
struct Args {
    /// Env file to seed configuration from; process variables take precedence.
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,
    /// Overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load(&args.env_file)
        .with_context(|| format!("loading configuration (env file {})", args.env_file.display()))?;
    if let Some(port) = args.port {
        config.port = port;
    }

    init_logging(&config.log)?;

    let state = AppState::from_config(&config);
    tracing::info!(
        servers = state.registry().len(),
        cache_ttl_secs = config.cache.ttl.as_secs(),
        rate_limit_max = config.rate_limit.max_requests,
        rate_limit_window_secs = config.rate_limit.window.as_secs(),
        "configuration loaded"
    );

    if state.registry().is_empty() {
        tracing::warn!("no SERVER<N>_NAME/SERVER<N>_URL pairs configured; video links are unavailable");
    }

    tokio::spawn(sweep_expired(state.clone()));

    let app = router(state);
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("Backend server is running on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("running API server")?;

    Ok(())
}

fn init_logging(log: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level)
            .with_context(|| format!("parsing LOG_LEVEL {:?}", log.level))?,
    };

    if log.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn sweep_expired(state: AppState) {
    let mut ticker = time::interval(SWEEP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let entries = state.cache().sweep(now);
        let clients = state.limiter().sweep(now);
        if entries > 0 || clients > 0 {
            tracing::debug!(entries, clients, "swept expired cache entries and rate windows");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
