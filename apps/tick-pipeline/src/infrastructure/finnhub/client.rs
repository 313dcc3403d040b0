//! Finnhub WebSocket Client
//!
//! Connects to `{url}?token=...`, subscribes to every configured symbol,
//! and publishes each non-ping text frame verbatim to the queue. Reconnects
//! with exponential backoff and re-sends subscriptions on every connect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::messages::{FrameKind, SubscribeRequest};
use crate::application::ports::{MessageSink, QueueError};
use crate::application::services::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::config::FinnhubCredentials;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A subscription request could not be encoded.
    #[error("failed to encode subscription: {0}")]
    Encode(#[from] serde_json::Error),

    /// The queue refused a frame.
    #[error("queue rejected frame: {0}")]
    Queue(#[from] QueueError),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Events and State
// =============================================================================

/// Events emitted by the feed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connected and subscriptions sent.
    Connected {
        /// Symbols subscribed on this connection.
        symbols: usize,
    },
    /// Disconnected from server.
    Disconnected,
    /// Reconnecting to server.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A frame was appended to the queue.
    Published {
        /// Partition assigned.
        partition: u32,
        /// Offset assigned.
        offset: u64,
    },
    /// Error reported by the server or raised locally.
    Error(String),
}

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Feed client not running.
    Disabled,
    /// Not connected.
    Disconnected,
    /// Connected and subscribed.
    Connected,
    /// Waiting to reconnect.
    Reconnecting,
    /// Last error has not been cleared by a successful connect.
    Error,
}

/// Shared feed status read by the health endpoints.
#[derive(Debug)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_published: AtomicU64,
}

impl FeedState {
    /// State for a feed that will connect.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_state(ConnectionState::Disconnected)
    }

    /// State for a feed that is switched off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::with_state(ConnectionState::Disabled)
    }

    const fn with_state(state: ConnectionState) -> Self {
        Self {
            state: parking_lot::RwLock::new(state),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_published: AtomicU64::new(0),
        }
    }

    /// Fold one client event into the state.
    pub fn apply(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Connected { .. } => {
                *self.state.write() = ConnectionState::Connected;
                *self.last_connected_at.write() = Some(Utc::now());
                *self.error_message.write() = None;
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                metrics::set_feed_connected(true);
            }
            FeedEvent::Disconnected => {
                *self.state.write() = ConnectionState::Disconnected;
                metrics::set_feed_connected(false);
            }
            FeedEvent::Reconnecting { attempt } => {
                *self.state.write() = ConnectionState::Reconnecting;
                self.reconnect_attempts.store(*attempt, Ordering::Relaxed);
            }
            FeedEvent::Published { .. } => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
            }
            FeedEvent::Error(message) => {
                *self.state.write() = ConnectionState::Error;
                *self.error_message.write() = Some(message.clone());
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Time of the last successful connect.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last error message, cleared on connect.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Frames published to the queue.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FinnhubClientConfig {
    /// WebSocket base URL.
    pub url: String,
    /// API token.
    pub credentials: FinnhubCredentials,
    /// Symbols to subscribe to.
    pub symbols: Vec<String>,
    /// Reconnection backoff.
    pub reconnect: BackoffConfig,
}

impl FinnhubClientConfig {
    /// Create a configuration with default reconnect behavior.
    #[must_use]
    pub fn new(url: String, credentials: FinnhubCredentials, symbols: Vec<String>) -> Self {
        Self {
            url,
            credentials,
            symbols,
            reconnect: BackoffConfig::default(),
        }
    }

    /// URL with the token attached.
    #[must_use]
    pub fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}token={}",
            self.url.trim_end_matches('/'),
            self.credentials.token()
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Feed ingestor: WebSocket in, queue out.
pub struct FinnhubClient<K>
where
    K: MessageSink + ?Sized,
{
    config: FinnhubClientConfig,
    sink: Arc<K>,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl<K> FinnhubClient<K>
where
    K: MessageSink + ?Sized,
{
    /// Create a new feed client.
    #[must_use]
    pub const fn new(
        config: FinnhubClientConfig,
        sink: Arc<K>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or reconnects are exhausted.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedClientError> {
        let mut reconnect_policy = BackoffPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Feed client stopped");
                    return Ok(());
                }
                Err(FeedClientError::Queue(QueueError::Closed)) => {
                    tracing::info!("Queue closed, feed client stopping");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    let Some(delay) = reconnect_policy.next_delay() else {
                        return Err(FeedClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = reconnect_policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to feed"
                    );
                    metrics::record_feed_reconnect();
                    let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, subscribe, and pump frames until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut BackoffPolicy,
    ) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(self.config.connect_url()).await?;
        let (mut write, mut read) = ws_stream.split();

        for symbol in &self.config.symbols {
            let request = SubscribeRequest::subscribe(symbol).to_json()?;
            write.send(Message::Text(request.into())).await?;
            tracing::info!(symbol = %symbol, "Subscribed");
        }

        reconnect_policy.reset();
        let _ = self
            .event_tx
            .send(FeedEvent::Connected {
                symbols: self.config.symbols.len(),
            })
            .await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_frame(text.as_str()).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Route one text frame: drop pings, publish everything else.
    async fn handle_text_frame(&self, text: &str) -> Result<(), FeedClientError> {
        let kind = FrameKind::classify(text);
        match &kind {
            FrameKind::Ping => {
                metrics::record_feed_frame("ping");
                return Ok(());
            }
            FrameKind::Error(message) => {
                metrics::record_feed_frame("error");
                tracing::error!(error = %message, "Feed reported an error");
                let _ = self.event_tx.send(FeedEvent::Error(message.clone())).await;
            }
            FrameKind::Data(frame_type) => metrics::record_feed_frame(frame_type),
        }

        match self.sink.publish(text.as_bytes().to_vec()).await {
            Ok((partition, offset)) => {
                tracing::trace!(partition, offset, "Frame published");
                let _ = self
                    .event_tx
                    .send(FeedEvent::Published { partition, offset })
                    .await;
                Ok(())
            }
            Err(QueueError::Full {
                partition,
                capacity,
            }) => {
                tracing::warn!(partition, capacity, "Queue full, frame dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
