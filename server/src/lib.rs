//! Sports content server: public read API + SSE update stream on the client
//! port, the same plus admin mutations on the admin port.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use shared::config::LiveConfig;
use shared::realtime::UpdateHub;
use shared::types::AppConfig;

pub mod database;
pub mod handlers;
pub mod tower_middle;

use handlers::http::routes::{RouterService, build_admin_api_routes, build_api_router};
use handlers::sse::{SseTransport, UpdateFanout};
use tower_middle::RequestTimeoutLayer;

pub use handlers::http::routes::Router;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything a handler needs. Cheap to clone; every field is a shared handle.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: LiveConfig,
    pub db: SqlitePool,
    /// Process-wide update bus. Handlers emit through `hub.emitter` after a
    /// write commits; the SSE transport installed on `hub.channel` pushes the
    /// event to every connected stream.
    pub hub: UpdateHub,
    pub fanout: Arc<UpdateFanout>,
}

impl AppState {
    pub fn new(config: AppConfig, db: SqlitePool) -> Self {
        let hub = UpdateHub::new();
        let fanout = Arc::new(UpdateFanout::new(config.realtime.channel_capacity));
        hub.channel
            .install_transport(Arc::new(SseTransport::new(fanout.clone())));

        Self {
            config: LiveConfig::new(config),
            db,
            hub,
            fanout,
        }
    }
}

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

/// Which listener a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Public reads + update stream.
    Client,
    /// Everything on `Client` plus token-guarded mutations.
    Admin,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Client => f.write_str("client"),
            Surface::Admin => f.write_str("admin"),
        }
    }
}

pub fn build_router(surface: Surface) -> Router {
    let router = build_api_router();
    match surface {
        Surface::Client => router,
        Surface::Admin => build_admin_api_routes(router),
    }
}

/// Accept connections on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState, surface: Surface) -> Result<()> {
    let (max_connections, request_timeout) = {
        let cfg = state.config.read().await;
        (cfg.server.max_connections, cfg.server.request_timeout())
    };
    let limit = Arc::new(Semaphore::new(max_connections));
    let router_service = RouterService::new(Arc::new(build_router(surface)), state);

    info!(
        "Serving {} surface on http://{} (max {} connections)",
        surface,
        listener.local_addr().context("Listener has no local address")?,
        max_connections
    );

    match surface {
        // No request timeout here: `/api/updates` is a long-lived stream.
        Surface::Client => {
            let service = ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .service(router_service);
            accept_loop(listener, service, limit, surface).await
        }
        Surface::Admin => {
            let service = ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(RequestTimeoutLayer::new(request_timeout))
                .service(router_service);
            accept_loop(listener, service, limit, surface).await
        }
    }
}

async fn accept_loop<S>(
    listener: TcpListener,
    service: S,
    limit: Arc<Semaphore>,
    surface: Surface,
) -> Result<()>
where
    S: tower::Service<
            Request<Incoming>,
            Response = Response<BoxBody<Bytes, Infallible>>,
            Error = Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    loop {
        let permit = limit
            .clone()
            .acquire_owned()
            .await
            .context("Connection limiter closed")?;

        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept {} connection: {}", surface, e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(service.clone());
        tokio::task::spawn(async move {
            let _permit = permit;
            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service)
                .await
            {
                debug!("Error serving {} connection from {}: {:?}", surface, peer, err);
            }
        });
    }
}

/// Re-read the config file on every SIGHUP. Ports, database and channel
/// capacity are bound at start-up; the admin token applies immediately.
#[cfg(unix)]
pub async fn reload_on_sighup(config: LiveConfig, path: String) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::error;

    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    while hangups.recv().await.is_some() {
        info!("SIGHUP received, reloading {}", path);
        match shared::config::load_config(&path) {
            Ok(new) => {
                config.reload(new).await;
                info!("Configuration reloaded");
            }
            Err(e) => error!("Config reload rejected, keeping current config: {}", e),
        }
    }
    Ok(())
}
