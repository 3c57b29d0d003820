use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::{AppState, Surface, database, serve};
use shared::config::load_config;

/// Sports content API: public reads and update stream on one port, admin
/// mutations on the other.
#[derive(Parser, Debug)]
#[command(name = "server", version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let client_addr = config.server.client_addr();
    let admin_addr = config.server.admin_addr();

    let db = database::connect(&config.database.resolved_url())
        .await
        .context("Failed to open database")?;
    let state = AppState::new(config, db);

    let client_listener = TcpListener::bind(&client_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", client_addr))?;
    let admin_listener = TcpListener::bind(&admin_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", admin_addr))?;

    info!(
        "Listening on http://{} and (admin) http://{}",
        client_addr, admin_addr
    );

    #[cfg(unix)]
    {
        let live = state.config.clone();
        let path = args.config.clone();
        tokio::spawn(async move {
            if let Err(e) = server::reload_on_sighup(live, path).await {
                tracing::error!("Config reload disabled: {:#}", e);
            }
        });
    }

    // Run both servers until one fails or we are interrupted
    tokio::select! {
        res = serve(client_listener, state.clone(), Surface::Client) => res?,
        res = serve(admin_listener, state.clone(), Surface::Admin) => res?,
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
    }

    state.db.close().await;
    info!("Both servers closed!");
    Ok(())
}
