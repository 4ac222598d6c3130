//! Interview Coach API server.
//!
//! Usage:
//!   cargo run --bin seed              # optional demo accounts
//!   cargo run --bin interview_coach   # start server
//!   # then see `coach-cli --help` or GET /api-docs/openapi.json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use interview_coach::ai::OpenAiClient;
use interview_coach::billing::StripeClient;
use interview_coach::config::Config;
use interview_coach::logging;
use interview_coach::rest::{create_router, AppState};
use interview_coach::storage::Storage;

#[derive(Parser, Debug)]
#[command(author, version, about = "Interview Coach API server", long_about = None)]
struct Args {
    /// Overrides PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides HOST
    #[arg(long)]
    host: Option<String>,

    /// Overrides DATA_DIR
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref());

    info!(data_dir = %config.data_dir.display(), "opening storage");
    let storage = Storage::open(&config.data_dir)?;

    let timeout = Duration::from_secs(config.http_timeout_secs);
    if config.openai.api_key.is_none() {
        warn!("OPENAI_API_KEY not set, transcription and chat requests will fail");
    }
    let openai = Arc::new(OpenAiClient::new(config.openai.clone(), timeout)?);
    if config.stripe.webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET not set, subscription webhooks will be rejected");
    }
    let stripe = Arc::new(StripeClient::new(config.stripe.clone(), timeout)?);

    let address = config.bind_address();
    let state = Arc::new(AppState {
        config,
        storage: storage.clone(),
        speech: openai.clone(),
        llm: openai,
        billing: stripe,
    });
    let app = create_router(state);

    let listener = TcpListener::bind(&address).await?;
    info!(%address, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let flushed = storage.flush().await?;
    info!(bytes = flushed, "storage flushed, shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
}
