use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::BackoffPolicy;
use super::decoder::TickDecoder;
use super::tick::TickEvent;

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub api_key: String,
    pub access_token: String,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid credential header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("authentication rejected by upstream: {0}")]
    AuthFailed(String),

    #[error("connection closed by upstream")]
    ConnectionClosed,
}

/// Connection lifecycle as observed by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    /// Transient failure; the reconnect loop will retry.
    Error,
    /// Terminal. Credentials are bad and retrying would only repeat the
    /// rejection, so the loop stops until the process is restarted with
    /// fresh credentials.
    AuthFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub tracked_instruments: usize,
}

/// State and reconnect intent live under one lock so that shutdown observes
/// both atomically: a concurrent error path cannot see `Closing` with
/// `should_reconnect` still true.
#[derive(Debug)]
struct LifecycleInner {
    state: ConnectionState,
    should_reconnect: bool,
}

#[derive(Debug)]
struct Lifecycle {
    inner: Mutex<LifecycleInner>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: ConnectionState::Disconnected,
                should_reconnect: true,
            }),
        }
    }

    fn transition(&self, state: ConnectionState) {
        self.inner.lock().state = state;
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn should_reconnect(&self) -> bool {
        self.inner.lock().should_reconnect
    }

    fn begin_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.should_reconnect = false;
        inner.state = ConnectionState::Closing;
    }

    fn fail_terminally(&self) {
        let mut inner = self.inner.lock();
        inner.should_reconnect = false;
        inner.state = ConnectionState::AuthFailed;
    }
}

/// Self-healing upstream WebSocket client.
///
/// Connects with credential headers, subscribes to the tracked instrument
/// tokens, and forwards every decoded tick to the outbound channel. Any
/// connection failure other than an authentication rejection re-enters the
/// connect loop after an exponential backoff delay.
pub struct FeedClient {
    config: FeedConfig,
    decoder: TickDecoder,
    tokens: Vec<u64>,
    tick_tx: mpsc::Sender<TickEvent>,
    backoff: BackoffPolicy,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
}

impl FeedClient {
    pub fn new(
        config: FeedConfig,
        decoder: TickDecoder,
        tokens: Vec<u64>,
        tick_tx: mpsc::Sender<TickEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            decoder,
            tokens,
            tick_tx,
            backoff: BackoffPolicy::new(),
            lifecycle: Lifecycle::new(),
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.state() == ConnectionState::Connected
    }

    /// Operational snapshot for health and status endpoints.
    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.lifecycle.state(),
            reconnect_attempts: self.backoff.attempt_count(),
            tracked_instruments: self.tokens.len(),
        }
    }

    /// Stops the client: no further reconnect attempts, and the live
    /// connection (if any) unsubscribes and closes on its next loop turn.
    pub fn shutdown(&self) {
        info!("🔌 feed client shutdown requested");
        self.lifecycle.begin_shutdown();
        self.cancel.cancel();
    }

    /// Runs the connect/stream/backoff loop until shutdown or a terminal
    /// authentication failure.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        loop {
            if !self.lifecycle.should_reconnect() {
                self.lifecycle.transition(ConnectionState::Disconnected);
                info!("feed client stopped");
                return Ok(());
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    // Clean close requested by shutdown.
                    self.lifecycle.transition(ConnectionState::Disconnected);
                    info!("feed connection closed cleanly");
                    return Ok(());
                }
                Err(err) => {
                    if is_auth_failure(&err.to_string()) {
                        error!(error = %err, "upstream rejected credentials, not retrying");
                        self.lifecycle.fail_terminally();
                        return Err(FeedError::AuthFailed(err.to_string()));
                    }

                    self.lifecycle.transition(ConnectionState::Error);
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %err,
                        attempt = self.backoff.attempt_count(),
                        delay_secs = delay.as_secs(),
                        "feed connection lost, reconnecting"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            self.lifecycle.transition(ConnectionState::Disconnected);
                            info!("feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&self) -> Result<(), FeedError> {
        self.lifecycle.transition(ConnectionState::Connecting);
        info!(url = %self.config.url, "connecting to upstream feed");

        let mut request = self.config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("X-Client-Version", HeaderValue::from_static("rust/1.0"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "token {}:{}",
                self.config.api_key, self.config.access_token
            ))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        self.lifecycle.transition(ConnectionState::Connected);
        self.backoff.reset();
        info!(tokens = self.tokens.len(), "✅ feed connected, subscribing");

        write
            .send(Message::Text(subscribe_message(&self.tokens)))
            .await?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.lifecycle.transition(ConnectionState::Closing);
                    // Best effort: the upstream drops state on close anyway.
                    let _ = write.send(Message::Text(unsubscribe_message(&self.tokens))).await;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(frame))) => self.handle_frame(&frame).await,
                        Some(Ok(Message::Text(text))) => {
                            if is_auth_failure(&text) {
                                return Err(FeedError::AuthFailed(text));
                            }
                            info!(message = %text, "upstream text message");
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            if let Some(frame) = &frame {
                                if is_auth_failure(&frame.reason) {
                                    return Err(FeedError::AuthFailed(frame.reason.to_string()));
                                }
                            }
                            warn!(?frame, "upstream closed the connection");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(FeedError::WebSocket(err)),
                        None => return Err(FeedError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Decodes one binary frame and forwards the ticks downstream. Decode
    /// failures drop the frame only; the connection stays up.
    async fn handle_frame(&self, frame: &[u8]) {
        // Single-byte frames are upstream heartbeats.
        if frame.len() <= 1 {
            return;
        }

        match self.decoder.decode(frame) {
            Ok(ticks) => {
                for tick in ticks {
                    if self.tick_tx.send(tick).await.is_err() {
                        warn!("tick channel closed, dropping decoded ticks");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, frame_len = frame.len(), "dropping undecodable frame");
            }
        }
    }
}

/// Upstream subscription payload: `{"a":"subscribe","v":[tokens]}`.
fn subscribe_message(tokens: &[u64]) -> String {
    json!({ "a": "subscribe", "v": tokens }).to_string()
}

fn unsubscribe_message(tokens: &[u64]) -> String {
    json!({ "a": "unsubscribe", "v": tokens }).to_string()
}

/// Authentication rejections arrive as text or close reasons rather than a
/// distinct status, so they are recognized by content.
fn is_auth_failure(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("401")
        || lowered.contains("unauthorized")
        || lowered.contains("authentication")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_lists_all_tokens() {
        let msg = subscribe_message(&[256265, 738561]);
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["a"], "subscribe");
        assert_eq!(value["v"], serde_json::json!([256265, 738561]));
    }

    #[test]
    fn unsubscribe_message_mirrors_subscribe_shape() {
        let msg = unsubscribe_message(&[42]);
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["a"], "unsubscribe");
        assert_eq!(value["v"], serde_json::json!([42]));
    }

    #[test]
    fn auth_failure_detection_is_case_insensitive() {
        assert!(is_auth_failure("HTTP 401 Unauthorized"));
        assert!(is_auth_failure("Authentication token expired"));
        assert!(is_auth_failure("UNAUTHORIZED"));
        assert!(!is_auth_failure("connection reset by peer"));
        assert!(!is_auth_failure("rate limit exceeded"));
    }

    #[test]
    fn shutdown_wins_over_concurrent_error_transition() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(ConnectionState::Connected);
        lifecycle.begin_shutdown();
        assert_eq!(lifecycle.state(), ConnectionState::Closing);
        assert!(!lifecycle.should_reconnect());
    }

    #[test]
    fn terminal_auth_failure_disables_reconnect() {
        let lifecycle = Lifecycle::new();
        lifecycle.fail_terminally();
        assert_eq!(lifecycle.state(), ConnectionState::AuthFailed);
        assert!(!lifecycle.should_reconnect());
    }

    #[test]
    fn fresh_lifecycle_starts_disconnected_and_willing() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert!(lifecycle.should_reconnect());
    }
}
