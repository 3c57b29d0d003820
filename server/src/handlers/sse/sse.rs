use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body_util::{BodyExt, StreamBody, combinators::BoxBody};
use hyper::body::{Frame, Incoming};
use hyper::header::HeaderValue;
use hyper::{Request, Response, StatusCode};
use tokio::sync::broadcast;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use shared::realtime::Transport;
use shared::types::{UPDATE_EVENT, UpdateEvent};

use crate::AppState;

// ---------------------------------------------------------------------------
// UpdateFanout
// ---------------------------------------------------------------------------

/// One broadcast channel shared by every `/api/updates` stream.
#[derive(Debug)]
pub struct UpdateFanout {
    tx: broadcast::Sender<UpdateEvent>,
}

impl UpdateFanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send to every connected stream. Returns how many received it; zero
    /// streams connected is not an error.
    pub fn broadcast(&self, event: UpdateEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// SseTransport
// ---------------------------------------------------------------------------

/// Bridges the server's `UpdateChannel` to connected SSE clients.
#[derive(Debug)]
pub struct SseTransport {
    fanout: Arc<UpdateFanout>,
}

impl SseTransport {
    pub fn new(fanout: Arc<UpdateFanout>) -> Self {
        Self { fanout }
    }
}

impl Transport for SseTransport {
    fn name(&self) -> &str {
        "sse"
    }

    fn forward(&self, event_name: &str, event: &UpdateEvent) -> Result<()> {
        if event_name != UPDATE_EVENT {
            return Ok(());
        }
        let streams = self.fanout.broadcast(event.clone());
        debug!(
            "SSE fan-out {} {} {} -> {} streams",
            event.kind, event.action, event.id, streams
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SseStreamBuilder
// ---------------------------------------------------------------------------

pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

/// Helpers for formatting SSE wire frames
pub struct SseStreamBuilder;

impl SseStreamBuilder {
    /// Standard SSE response headers
    pub fn response_headers() -> (HeaderValue, HeaderValue) {
        (
            HeaderValue::from_static("text/event-stream"),
            HeaderValue::from_static("no-cache"),
        )
    }

    /// `event: update` frame whose `id:` is the event id, so a client can
    /// de-duplicate against events it already delivered locally.
    pub fn format_event(event: &UpdateEvent) -> String {
        let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
        format!("event: update\nid: {}\ndata: {}\n\n", event.id, data)
    }

    /// A named control event carrying arbitrary JSON data.
    pub fn format_raw(event_type: &str, data: &serde_json::Value) -> String {
        let data_str = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", event_type, data_str)
    }
}

// ---------------------------------------------------------------------------
// Update stream
// ---------------------------------------------------------------------------

/// Frames for one client: `connected` first, then one frame per fan-out
/// event, with a keepalive comment whenever `keepalive` passes without one.
/// A lagging receiver gets a `reconnect` frame and the stream ends.
pub fn update_stream(
    mut rx: broadcast::Receiver<UpdateEvent>,
    keepalive: Duration,
    connected: String,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        yield Ok::<Bytes, Infallible>(Bytes::from(connected));

        let period = keepalive.max(Duration::from_millis(100));
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            let received = tokio::select! {
                received = rx.recv() => Some(received),
                _ = ticker.tick() => None,
            };

            match received {
                Some(Ok(event)) => {
                    ticker.reset();
                    yield Ok::<Bytes, Infallible>(Bytes::from(SseStreamBuilder::format_event(&event)));
                }
                Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!("SSE client lagged by {} events, sending reconnect hint", n);
                    let frame = SseStreamBuilder::format_raw(
                        "reconnect",
                        &serde_json::json!({ "reason": "lagged", "missed": n }),
                    );
                    yield Ok::<Bytes, Infallible>(Bytes::from(frame));
                    break;
                }
                Some(Err(broadcast::error::RecvError::Closed)) => break,
                None => {
                    yield Ok::<Bytes, Infallible>(Bytes::from_static(KEEPALIVE_FRAME.as_bytes()));
                }
            }
        }
        info!("SSE stream closed");
    }
}

// ---------------------------------------------------------------------------
// SSE subscribe handler
// ---------------------------------------------------------------------------

/// `GET /api/updates`
///
/// ### Event sequence emitted
/// ```text
/// event: connected        handshake OK
/// event: update           one per UpdateEvent, `id:` = event id
/// : keepalive             comment frame while idle
/// event: reconnect        client lagged; should reconnect and reload
/// ```
pub async fn handle_sse_subscribe(
    _req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let keepalive = state.config.keepalive().await;
    let rx = state.fanout.subscribe();
    let subscribers = state.fanout.receiver_count();
    info!("SSE connected ({} streams)", subscribers);

    let connected =
        SseStreamBuilder::format_raw("connected", &serde_json::json!({ "streams": subscribers }));
    let stream = update_stream(rx, keepalive, connected);
    let body = BodyExt::boxed(StreamBody::new(
        stream.map(|result| result.map(Frame::data)),
    ));

    let (content_type, cache_control) = SseStreamBuilder::response_headers();
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("cache-control", cache_control)
        .header("x-accel-buffering", "no")
        .body(body)
        .context("Failed to build SSE response")
}
