//! chat-relay binary: loads configuration and serves the relay API.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use chat_relay::config::{Cli, Config};
use chat_relay::server::{build_router, AppState};
use chat_relay::upstream::HttpUpstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        ollama = %config.ollama.base_url,
        deepseek = %config.deepseek.base_url,
        deepseek_key_set = !config.deepseek.api_key.is_empty(),
        ragflow = %config.ragflow.api_url,
        ragflow_key_set = !config.ragflow.api_key.is_empty(),
        error_policy = ?config.deepseek.error_policy,
        "Configuration loaded"
    );

    // One shared HTTP client for every upstream call.
    let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);

    let state = Arc::new(AppState::new(config.clone(), upstream));
    let app = build_router(state);

    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
