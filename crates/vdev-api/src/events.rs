//! Door controller event stream with auto-reconnect.
//!
//! Reads the controller's server-sent-event endpoint, turns each line
//! into an [`EventRecord`] and hands it to an [`EventSink`]. Reconnects
//! with capped exponential backoff, and gives up after `max_retries`
//! consecutive failures until started again.
//!
//! # Example
//!
//! ```rust,ignore
//! use vdev_api::events::{EventStream, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let stream = EventStream::new(http, door.events_url()?, ReconnectConfig::default());
//! let cancel = CancellationToken::new();
//! if let Some(handle) = stream.spawn(queue.clone(), cancel.child_token()) {
//!     // second spawn while this one runs returns None
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Records ──────────────────────────────────────────────────────────

/// What an event line carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Retry,
    Id,
    Ping,
    Error,
    Log,
    State,
    Unknown,
}

impl EventKind {
    /// Map an `event:` name; anything unrecognized becomes `Unknown`.
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or(Self::Unknown)
    }

    /// Everything except `state` is a control record.
    pub fn is_control(self) -> bool {
        !matches!(self, Self::State)
    }
}

/// Event payload, decided once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Any valid JSON value.
    Structured(serde_json::Value),
    /// Anything else, verbatim.
    Raw(String),
}

impl EventPayload {
    fn from_data(data: &str) -> Self {
        serde_json::from_str::<serde_json::Value>(data)
            .map_or_else(|_| Self::Raw(data.to_owned()), Self::Structured)
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Textual form, for logs and substring checks.
    pub fn text(&self) -> String {
        match self {
            Self::Structured(value) => value.to_string(),
            Self::Raw(text) => text.clone(),
        }
    }
}

/// One complete record from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(kind: EventKind, payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }

    /// `id` field of a structured payload.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload
            .as_structured()
            .and_then(|v| v.get("id"))
            .and_then(serde_json::Value::as_str)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// Receiver of parsed records.
pub trait EventSink: Send + Sync + 'static {
    fn push(&self, record: EventRecord);
}

// ── Line parser ──────────────────────────────────────────────────────

/// Incremental parser for the `key: value` line protocol.
///
/// Feed it raw chunks; partial lines are carried over to the next call.
#[derive(Debug, Default)]
pub struct SseParser {
    pending_event: Option<String>,
    partial: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the records completed by it.
    pub fn feed(&mut self, chunk: &[u8], now: DateTime<Utc>) -> Vec<EventRecord> {
        self.partial.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if let Some(record) = self.parse_line(text, now) {
                records.push(record);
            }
        }
        records
    }

    /// Parse one line without its terminator.
    pub fn parse_line(&mut self, line: &str, now: DateTime<Utc>) -> Option<EventRecord> {
        if line.is_empty() {
            return None;
        }
        if line.starts_with(':') {
            tracing::trace!(comment = &line[1..], "event stream comment");
            return None;
        }
        let Some((key, value)) = line.split_once(':') else {
            tracing::debug!(line, "malformed event line dropped");
            return None;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match key {
            "event" => {
                self.pending_event = Some(value.to_owned());
                None
            }
            "data" => {
                let name = self.pending_event.take();
                let payload = EventPayload::from_data(value);
                let kind = match &payload {
                    EventPayload::Raw(_) => EventKind::Log,
                    EventPayload::Structured(_) => {
                        name.as_deref().map_or(EventKind::Unknown, EventKind::from_name)
                    }
                };
                Some(EventRecord::new(kind, payload, now))
            }
            "retry" => Some(EventRecord::new(
                EventKind::Retry,
                EventPayload::Raw(value.to_owned()),
                now,
            )),
            "id" => Some(EventRecord::new(
                EventKind::Id,
                EventPayload::Raw(value.to_owned()),
                now,
            )),
            other => {
                tracing::debug!(key = other, "unknown event field dropped");
                None
            }
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Consecutive failures before giving up. `None` retries forever.
    /// Default: 10.
    pub max_retries: Option<u32>,

    /// Longest silence tolerated on an open stream. Default: 30s.
    pub idle_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: Some(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// `min(initial * 2^attempt, max)`
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .initial_delay
        .checked_mul(factor)
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}

// ── StreamState ──────────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff { attempt: u32 },
}

// ── EventStream ──────────────────────────────────────────────────────

/// Handle for one controller's event stream.
///
/// At most one streaming attempt runs at a time; the start lock is held
/// by the background task for its whole life.
pub struct EventStream {
    http: reqwest::Client,
    url: Url,
    reconnect: ReconnectConfig,
    state: watch::Sender<StreamState>,
    start_lock: Arc<Mutex<()>>,
}

impl EventStream {
    pub fn new(http: reqwest::Client, url: Url, reconnect: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        Self {
            http,
            url,
            reconnect,
            state,
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// `true` while a streaming task holds the start lock.
    pub fn is_running(&self) -> bool {
        self.start_lock.try_lock().is_err()
    }

    /// Start streaming into `sink`. Returns `None` if already running.
    pub fn spawn<S: EventSink>(
        &self,
        sink: Arc<S>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let Ok(guard) = Arc::clone(&self.start_lock).try_lock_owned() else {
            tracing::debug!(url = %self.url, "event stream already running");
            return None;
        };

        let http = self.http.clone();
        let url = self.url.clone();
        let reconnect = self.reconnect.clone();
        let state = self.state.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            stream_loop(&http, &url, &reconnect, &state, sink.as_ref(), &cancel).await;
            state.send_replace(StreamState::Disconnected);
        }))
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// connect → read → on drop, backoff → reconnect.
async fn stream_loop<S: EventSink>(
    http: &reqwest::Client,
    url: &Url,
    reconnect: &ReconnectConfig,
    state: &watch::Sender<StreamState>,
    sink: &S,
    cancel: &CancellationToken,
) {
    let mut attempt: u32 = 0;

    while !cancel.is_cancelled() {
        state.send_replace(StreamState::Connecting);

        match connect_and_read(http, url, reconnect, state, sink, cancel, &mut attempt).await {
            Ok(()) if cancel.is_cancelled() => break,
            // Clean end of stream counts as a drop with a fresh counter.
            Ok(()) => {
                tracing::info!(url = %url, "event stream ended, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event stream error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            url = %url,
                            "event stream reconnection limit reached, giving up"
                        );
                        break;
                    }
                }
            }
        }

        let delay = calculate_backoff(attempt, reconnect);
        state.send_replace(StreamState::Backoff { attempt });
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

        attempt = attempt.saturating_add(1);
    }

    tracing::debug!(url = %url, "event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open the stream and read until it drops, idles out or is cancelled.
async fn connect_and_read<S: EventSink>(
    http: &reqwest::Client,
    url: &Url,
    reconnect: &ReconnectConfig,
    state: &watch::Sender<StreamState>,
    sink: &S,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to event stream");

    let request = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send();

    let resp = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        resp = tokio::time::timeout(reconnect.idle_timeout, request) => match resp {
            Ok(resp) => resp?,
            Err(_) => return Err(idle_error(reconnect)),
        },
    };

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    tracing::info!(url = %url, "event stream connected");
    state.send_replace(StreamState::Streaming);
    *attempt = 0;

    let mut parser = SseParser::new();
    let mut body = resp.bytes_stream();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            chunk = tokio::time::timeout(reconnect.idle_timeout, body.next()) => {
                match chunk {
                    Err(_) => return Err(idle_error(reconnect)),
                    Ok(Some(Ok(bytes))) => {
                        for record in parser.feed(&bytes, Utc::now()) {
                            tracing::trace!(kind = %record.kind, "event record");
                            sink.push(record);
                        }
                    }
                    Ok(Some(Err(e))) => return Err(Error::Transport(e)),
                    Ok(None) => return Ok(()),
                }
            }
        }
    }
}

fn idle_error(reconnect: &ReconnectConfig) -> Error {
    Error::IdleTimeout {
        timeout_secs: reconnect.idle_timeout.as_secs(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
