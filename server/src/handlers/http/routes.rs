use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use tracing::{error, warn};

use shared::types::{
    ContentFields, HighlightFields, LeagueFields, MatchFields, VideoFields,
};

use crate::AppState;
use crate::handlers::http::content;
use crate::handlers::http::utils::*;
use crate::handlers::sse;

// ---------------------------------------------------------------------------
// Handler type alias
// ---------------------------------------------------------------------------
//
// Two tiers:
//
//   Open  : no auth. Every public read and the update stream.
//   Admin : `Authorization: Bearer <admin token>` checked by the router
//            before the handler runs. Every mutation.

type RouteHandler = Box<
    dyn Fn(
            Request<Incoming>,
            AppState,
        )
            -> Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// RouteKind
// ---------------------------------------------------------------------------

enum RouteKind {
    /// No authentication check.
    Open(RouteHandler),

    /// Admin bearer token required.
    Admin(RouteHandler),
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

struct Route {
    method: Method,
    path: String,
    kind: RouteKind,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes_count", &self.routes.len())
            .finish()
    }
}

fn boxed<F, Fut>(handler: F) -> RouteHandler
where
    F: Fn(Request<Incoming>, AppState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
{
    Box::new(move |req, state| Box::pin(handler(req, state)))
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    fn push(mut self, method: Method, path: &str, kind: RouteKind) -> Self {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            kind,
        });
        self
    }

    // ── Open (no auth) ────────────────────────────────────────────────────────

    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.push(Method::GET, path, RouteKind::Open(boxed(handler)))
    }

    // ── Admin (bearer token) ─────────────────────────────────────────────────

    pub fn admin_post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.push(Method::POST, path, RouteKind::Admin(boxed(handler)))
    }

    pub fn admin_put<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.push(Method::PUT, path, RouteKind::Admin(boxed(handler)))
    }

    pub fn admin_delete<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.push(Method::DELETE, path, RouteKind::Admin(boxed(handler)))
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    pub async fn route(
        &self,
        req: Request<Incoming>,
        state: AppState,
    ) -> Result<Response<BoxBody<Bytes, Infallible>>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        for route in &self.routes {
            if route.method != method || !Self::path_matches(&route.path, &path) {
                continue;
            }

            return match &route.kind {
                RouteKind::Open(h) => h(req, state).await,

                RouteKind::Admin(h) => {
                    let expected = state.config.admin_token().await;
                    let authorized = match (bearer_token(req.headers()), expected.as_deref()) {
                        (Some(presented), Some(expected)) => token_matches(presented, expected),
                        _ => false,
                    };
                    if authorized {
                        h(req, state).await
                    } else {
                        warn!("Admin auth rejected {} {}", method, path);
                        unauthorized()
                    }
                }
            };
        }

        deliver_error_json("NOT_FOUND", "Endpoint not found", StatusCode::NOT_FOUND)
            .context("Failed to deliver 404 response")
    }

    // ── Path matching ─────────────────────────────────────────────────────────

    pub fn path_matches(route_path: &str, request_path: &str) -> bool {
        // Strip query string from incoming request path before comparing.
        let clean = request_path.split('?').next().unwrap_or(request_path);

        if route_path == clean {
            return true;
        }

        // Segment-by-segment matching for `:param` wildcards.
        // e.g.  "/api/matches/:id"  matches  "/api/matches/42"
        let route_segs: Vec<&str> = route_path.split('/').collect();
        let path_segs: Vec<&str> = clean.split('/').collect();

        if route_segs.len() != path_segs.len() {
            return false;
        }

        route_segs
            .iter()
            .zip(path_segs.iter())
            .all(|(r, p)| (r.starts_with(':') && !p.is_empty()) || r == p)
    }
}

// ---------------------------------------------------------------------------
// Tower service
// ---------------------------------------------------------------------------

/// The router as a `tower::Service`, so the tower-http layers in `serve` can
/// wrap it. Handler errors become a 500 envelope here; the service itself
/// never fails.
#[derive(Clone, Debug)]
pub struct RouterService {
    router: Arc<Router>,
    state: AppState,
}

impl RouterService {
    pub fn new(router: Arc<Router>, state: AppState) -> Self {
        Self { router, state }
    }
}

impl tower::Service<Request<Incoming>> for RouterService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        let state = self.state.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            match router.route(req, state).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    error!("{} {} failed: {:#}", method, path, e);
                    Ok(internal_error_response())
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn unauthorized() -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_error_json(
        "UNAUTHORIZED",
        "Admin token required",
        StatusCode::UNAUTHORIZED,
    )
    .context("Failed to deliver 401 response")
}

fn register_reads<F: ContentFields>(router: Router) -> Router {
    let collection = F::KIND.collection();
    router
        .get(&format!("/api/{}", collection), content::handle_list::<F>)
        .get(&format!("/api/{}/:id", collection), content::handle_get::<F>)
}

fn register_writes<F: ContentFields>(router: Router) -> Router {
    let collection = F::KIND.collection();
    router
        .admin_post(&format!("/admin/api/{}", collection), content::handle_create::<F>)
        .admin_put(&format!("/admin/api/{}/:id", collection), content::handle_update::<F>)
        .admin_delete(&format!("/admin/api/{}/:id", collection), content::handle_delete::<F>)
}

// ---------------------------------------------------------------------------
// Shared base API router
//
// Served on both ports. Nothing here mutates state.
// ---------------------------------------------------------------------------

pub fn build_api_router() -> Router {
    let router = Router::new()
        .get("/health", |_req, _state| async move {
            deliver_serialized_json(
                &serde_json::json!({"status": "success", "health": "ok"}),
                StatusCode::OK,
            )
        })
        .get("/api/featured", content::handle_get_featured)
        .get("/api/updates", sse::handle_sse_subscribe);

    let router = register_reads::<MatchFields>(router);
    let router = register_reads::<LeagueFields>(router);
    let router = register_reads::<VideoFields>(router);
    register_reads::<HighlightFields>(router)
}

// ---------------------------------------------------------------------------
// Admin-specific routes
//
// Every route here is the Admin tier; the token check happens in `route`.
// ---------------------------------------------------------------------------

pub fn build_admin_api_routes(router: Router) -> Router {
    let router = register_writes::<MatchFields>(router);
    let router = register_writes::<LeagueFields>(router);
    let router = register_writes::<VideoFields>(router);
    let router = register_writes::<HighlightFields>(router);

    router
        .admin_put("/admin/api/featured", content::handle_set_featured)
        .admin_delete("/admin/api/featured", content::handle_clear_featured)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
