use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use anyhow::Context;
use http_body_util::BodyExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::realtime::{Transport, UpdateChannel};
use shared::types::{UPDATE_EVENT, UpdateEvent};

use crate::api::ApiClient;

pub const BRIDGE_NAME: &str = "sse-bridge";

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `message` when the frame carried no `event:` line.
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

/// Bytes an unterminated frame may occupy before the decoder gives up on it.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` parser. Chunks may split frames, lines
/// or UTF-8 sequences anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a terminator.
    scanned: usize,
    /// Set after an oversized frame was dropped; its tail is skipped up to
    /// the next terminator.
    discarding: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut frames = Vec::new();
        loop {
            // Back up one byte: the terminator may straddle two chunks.
            let from = self.scanned.saturating_sub(1);
            let Some(pos) = self.buf[from..].windows(2).position(|w| w == b"\n\n") else {
                self.scanned = self.buf.len();
                break;
            };
            let block: Vec<u8> = self.buf.drain(..from + pos + 2).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }

        if self.buf.len() > MAX_FRAME_BYTES {
            warn!(
                "Dropping {} bytes of unterminated SSE frame (limit {})",
                self.buf.len(),
                MAX_FRAME_BYTES
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut id = None;
    let mut data: Option<String> = None;

    for line in block.lines() {
        // Blank lines end the block; `:` lines are comments (keepalives).
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".to_string()),
        id,
        data: data.unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Bridge transport
// ---------------------------------------------------------------------------

/// Inbound-only transport: reads the server's `/api/updates` stream and
/// hands every `update` frame to [`UpdateChannel::deliver_inbound`].
/// Local publishes are not forwarded; the server emits its own events.
pub struct SseBridge {
    api: ApiClient,
    reconnect: Duration,
    connected: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SseBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseBridge")
            .field("base_url", &self.api.base_url())
            .field("reconnect", &self.reconnect)
            .field("connected", &*self.connected.borrow())
            .finish()
    }
}

impl Transport for SseBridge {
    fn name(&self) -> &str {
        BRIDGE_NAME
    }

    fn forward(&self, _event_name: &str, _event: &UpdateEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

enum StreamEnd {
    Closed,
    Reconnect(String),
    ChannelGone,
}

impl SseBridge {
    pub fn new(api: ApiClient, reconnect: Duration) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            api,
            reconnect,
            connected,
            reader: Mutex::new(None),
        })
    }

    /// Install on `channel` and start the reader task. Calling it again
    /// replaces the previous reader.
    pub fn attach(self: &Arc<Self>, channel: &Arc<UpdateChannel>) {
        channel.remove_transport(BRIDGE_NAME);
        channel.install_transport(self.clone());

        let task = tokio::spawn(run_reader(
            self.api.clone(),
            Arc::downgrade(channel),
            self.reconnect,
            self.connected.clone(),
        ));
        let previous = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn detach(&self, channel: &UpdateChannel) {
        channel.remove_transport(BRIDGE_NAME);
        self.stop_reader();
    }

    /// Flips to `true` on each `connected` frame and back to `false` when
    /// the stream is lost.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn stop_reader(&self) {
        if let Some(task) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.connected.send_replace(false);
    }
}

impl Drop for SseBridge {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

async fn run_reader(
    api: ApiClient,
    channel: Weak<UpdateChannel>,
    reconnect: Duration,
    connected: watch::Sender<bool>,
) {
    loop {
        match read_stream(&api, &channel, &connected).await {
            Ok(StreamEnd::ChannelGone) => {
                debug!("Update channel dropped, bridge reader exiting");
                return;
            }
            Ok(StreamEnd::Closed) => info!("Update stream closed by server"),
            Ok(StreamEnd::Reconnect(reason)) => info!("Server asked to reconnect: {}", reason),
            Err(e) => warn!("Update stream failed: {:#}", e),
        }
        connected.send_replace(false);
        tokio::time::sleep(reconnect).await;
    }
}

async fn read_stream(
    api: &ApiClient,
    channel: &Weak<UpdateChannel>,
    connected: &watch::Sender<bool>,
) -> anyhow::Result<StreamEnd> {
    let mut body = api
        .open_update_stream()
        .await
        .context("Failed to open update stream")?;
    let mut decoder = SseDecoder::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.context("Update stream interrupted")?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };

        for sse in decoder.push(&chunk) {
            match sse.event.as_str() {
                "update" => {
                    let Some(channel) = channel.upgrade() else {
                        return Ok(StreamEnd::ChannelGone);
                    };
                    match serde_json::from_str::<UpdateEvent>(&sse.data) {
                        Ok(event) => {
                            if let Some(report) = channel.deliver_inbound(UPDATE_EVENT, &event) {
                                debug!(
                                    "Inbound {} {} event {} reached {} listener(s)",
                                    event.kind,
                                    event.action,
                                    event.id,
                                    report.invoked()
                                );
                            }
                        }
                        Err(e) => warn!("Ignoring malformed update frame: {}", e),
                    }
                }
                "connected" => {
                    info!("Update stream connected to {}", api.base_url());
                    connected.send_replace(true);
                }
                "reconnect" => return Ok(StreamEnd::Reconnect(sse.data)),
                other => debug!("Ignoring '{}' frame", other),
            }
        }
    }
    Ok(StreamEnd::Closed)
}
