use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use visitor_throttle::config::{LogFormat, LoggingConfig, ServiceConfig};
use visitor_throttle::http::HttpServer;
use visitor_throttle::ratelimit::VisitorThrottle;

/// Per-client request throttle in front of an HTTP service.
#[derive(Parser, Debug)]
#[command(name = "visitor-throttle", version, about)]
struct Args {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Visitor Throttle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        requests_per_second = config.throttle.requests_per_second,
        burst = config.throttle.burst,
        "Configuration loaded"
    );

    let throttle = Arc::new(VisitorThrottle::new(config.throttle.clone())?);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));
    let sweeper = throttle.spawn_sweeper(shutdown.child_token());

    let server = HttpServer::new(config.server.http_addr, Arc::clone(&throttle));
    let served = server
        .serve_with_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    sweeper.await?;
    served?;

    info!("Visitor Throttle stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
///
/// Returns without cancelling if `shutdown` is cancelled elsewhere first.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        _ = shutdown.cancelled() => return,
        received = ctrl_c => received,
        received = terminate => received,
    };

    info!(signal = received, "Initiating graceful shutdown");
    shutdown.cancel();
}
