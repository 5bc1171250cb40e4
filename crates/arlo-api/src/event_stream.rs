//! Push event stream with frame reassembly and auto-reconnect.
//!
//! The cloud keeps one streaming GET open per session and writes
//! pseudo server-sent events into it: `event: message` followed by a
//! `data:` JSON object, arbitrarily split across chunks. [`FrameAssembler`]
//! turns chunks back into [`Envelope`]s and [`EventStreamHandle`] runs the
//! connect/read/reconnect loop, publishing [`StreamEvent`]s through a
//! [`tokio::sync::broadcast`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arlo_api::event_stream::{EventStreamHandle, ReconnectConfig, StreamEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let (tx, mut rx) = tokio::sync::broadcast::channel(1024);
//! let handle = EventStreamHandle::connect(api, ReconnectConfig::default(), CancellationToken::new(), tx);
//!
//! while let Ok(event) = rx.recv().await {
//!     if let StreamEvent::Envelope(envelope) = event {
//!         println!("{:?} {:?}", envelope.action, envelope.resource);
//!     }
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── Envelope ─────────────────────────────────────────────────────────

/// One parsed push message.
///
/// Uses `#[serde(flatten)]` to keep every field beyond the common
/// discriminators: mode changes are keyed by hub id and bulk updates
/// carry a `devices` map at the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trans_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Object for most resources; some hubs send an empty array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_last_image_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn is_status(&self, status: &str) -> bool {
        self.status.as_deref() == Some(status)
    }

    pub fn is_action(&self, action: &str) -> bool {
        self.action.as_deref() == Some(action)
    }

    pub fn is_resource(&self, resource: &str) -> bool {
        self.resource.as_deref() == Some(resource)
    }

    /// Properties as an object, if they are one.
    pub fn properties_object(&self) -> Option<&Map<String, Value>> {
        self.properties.as_ref().and_then(Value::as_object)
    }
}

/// Outer wrapper produced by rewriting the SSE preamble.
#[derive(Debug, Deserialize)]
struct Frame {
    data: Envelope,
}

// ── Frame reassembly ─────────────────────────────────────────────────

/// Accumulates raw chunks until they form one complete message.
///
/// The buffer only ever holds the unterminated tail of the current
/// message: it is cleared exactly when [`push`](Self::push) yields an
/// envelope and grows otherwise. There is no size cap; a connection that
/// never completes a message grows until it drops.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns the envelope if the buffer now parses.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Envelope> {
        self.buffer.extend_from_slice(chunk);

        // A chunk boundary can split a multi-byte character.
        let text = std::str::from_utf8(&self.buffer).ok()?;
        let envelope = coerce(text)?;

        self.buffer.clear();
        Some(envelope)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Rewrite `event: message<ws>data` into a JSON field, normalize the
/// typographic quote the server sometimes emits and parse.
fn coerce(raw: &str) -> Option<Envelope> {
    // Trailing blank lines of the previous message may lead the buffer.
    let raw = raw.trim_start();
    let rewritten = raw
        .strip_prefix("event: message")
        .and_then(|rest| rest.trim_start().strip_prefix("data"))
        .map_or_else(|| raw.to_owned(), |rest| format!("\"event\": \"message\", \"data\"{rest}"));

    let wrapped = format!("{{{rewritten}}}").replace('\u{201C}', "\"");

    match serde_json::from_str::<Frame>(&wrapped) {
        Ok(frame) => Some(frame.data),
        Err(e) => {
            tracing::trace!(error = %e, len = raw.len(), "incomplete frame, buffering");
            None
        }
    }
}

// ── Stream events ────────────────────────────────────────────────────

/// What the stream task publishes.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The subscribe request was accepted; envelopes follow.
    Opened,
    /// One complete push message.
    Envelope(Arc<Envelope>),
    /// The connection dropped; a reconnect follows unless exhausted.
    Closed { reason: String },
    /// The reconnect budget is spent, or the session was rejected.
    Exhausted,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Consecutive failed connections tolerated before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(10),
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running push stream.
///
/// Cancelling the token (or calling [`shutdown`](Self::shutdown)) stops
/// delivery immediately and suppresses any further reconnect.
pub struct EventStreamHandle {
    event_tx: broadcast::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    /// Spawn the connect/read/reconnect loop and return immediately.
    ///
    /// Callers should subscribe to `event_tx` before calling this so the
    /// first [`StreamEvent::Opened`] is not missed.
    pub fn connect(
        api: Arc<ApiClient>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        event_tx: broadcast::Sender<StreamEvent>,
    ) -> Self {
        let task_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            stream_loop(api, task_tx, reconnect, task_cancel).await;
        });

        Self { event_tx, cancel }
    }

    /// Get a new receiver for the stream's events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.event_tx.subscribe()
    }

    /// Signal the background task to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: open → read → on drop, backoff → reopen.
async fn stream_loop(
    api: Arc<ApiClient>,
    event_tx: broadcast::Sender<StreamEvent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = open_and_read(&api, &event_tx, &cancel) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        match result {
            // The server ended a productive connection. Reopen at once.
            Ok(delivered) if delivered > 0 => {
                tracing::info!(delivered, "event stream ended, reconnecting");
                let _ = event_tx.send(StreamEvent::Closed {
                    reason: "stream ended".into(),
                });
                attempt = 0;
                continue;
            }
            Ok(_) => {
                tracing::warn!(attempt, "event stream ended without delivering anything");
                let _ = event_tx.send(StreamEvent::Closed {
                    reason: "stream ended empty".into(),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event stream error");
                let _ = event_tx.send(StreamEvent::Closed { reason: e.to_string() });

                if e.is_auth_expired() {
                    tracing::error!("event stream rejected the session, giving up");
                    let _ = event_tx.send(StreamEvent::Exhausted);
                    break;
                }
            }
        }

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(max_retries = max, "event stream reconnection limit reached, giving up");
                let _ = event_tx.send(StreamEvent::Exhausted);
                break;
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }

    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one stream and read until it drops. Returns how many envelopes
/// were delivered on this connection.
async fn open_and_read(
    api: &ApiClient,
    event_tx: &broadcast::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<usize, Error> {
    let response = api.open_event_stream().await?;
    tracing::info!("event stream open");
    let _ = event_tx.send(StreamEvent::Opened);

    let mut body = response.bytes_stream();
    let mut assembler = FrameAssembler::new();
    let mut delivered = 0_usize;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(delivered),
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    if let Some(envelope) = assembler.push(&bytes) {
                        delivered += 1;
                        // No subscribers is not an error.
                        let _ = event_tx.send(StreamEvent::Envelope(Arc::new(envelope)));
                    }
                }
                Some(Err(e)) => {
                    if assembler.pending() > 0 {
                        tracing::debug!(pending = assembler.pending(), "discarding partial frame");
                    }
                    return Err(Error::EventStream(e.to_string()));
                }
                None => return Ok(delivered),
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
