//! Registry server binary.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr;
use registry::RegistryConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Container registry with resumable uploads and rename lease admission
#[derive(Parser, Debug)]
#[command(name = "registry-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let subscriber = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = match &args.config {
        Some(path) => RegistryConfig::load(path)
            .await
            .wrap_err_with(|| format!("loading configuration from {path}"))?,
        None => {
            tracing::info!("no configuration file, using in-memory storage");
            RegistryConfig::default()
        }
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let listen = config.listen;
    let read_only = config.read_only;
    let app = config
        .builder()
        .await
        .wrap_err("constructing registry")?
        .build();

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .wrap_err_with(|| format!("binding {listen}"))?;
    tracing::info!(%listen, read_only, "registry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await
        .wrap_err("serving")?;

    tracing::info!("registry stopped");
    Ok(())
}

async fn shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
