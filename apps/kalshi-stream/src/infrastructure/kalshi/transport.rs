//! WebSocket Transport
//!
//! Owns exactly one physical connection at a time plus its two background
//! tasks: a read task that decodes frames and hands envelopes to the
//! [`EnvelopeHandler`], and a keep-alive task driven by the
//! [`HeartbeatManager`].
//!
//! Every write (commands, probes, pong replies, close frames) goes through
//! one async mutex so there is a single writer at a time. Reads proceed
//! independently. The transport never retries; reconnection belongs to the
//! supervisor.
//!
//! # Session Lifecycle
//!
//! Each successful [`Transport::connect`] starts a new session identified by
//! a generation number. Teardown paths (read error, keep-alive failure,
//! [`Transport::close`]) race for the session's sink under the write lock,
//! so exactly one of them reports `disconnected` for a given session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::kalshi::ports::{
    Connection, ConnectionObserver, Connector, EnvelopeHandler, FrameSink, FrameStream,
};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::kalshi::auth::{Credentials, STREAM_PATH, SignatureError};
use crate::infrastructure::kalshi::codec::{CodecError, JsonCodec};
use crate::infrastructure::kalshi::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatManager, HeartbeatState, LivenessProbe,
};
use crate::infrastructure::kalshi::messages::Envelope;
use crate::infrastructure::metrics;

/// Bound on the best-effort close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Errors
// =============================================================================

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `connect` was called while a session is live.
    #[error("already connected")]
    AlreadyConnected,

    /// A write was attempted with no live session.
    #[error("not connected")]
    NotConnected,

    /// Dialing, the upgrade handshake, or a write failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The upgrade handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Handshake headers could not be signed.
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    /// An inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// The keep-alive task declared the connection dead.
    #[error("heartbeat failure: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// The connection ended without a close handshake.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The supervisor gave up reconnecting.
    #[error("reconnect attempts exhausted after {0}")]
    ReconnectExhausted(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Stream URL (`wss://.../trade-api/ws/v2`).
    pub url: String,
    /// Bound on dial plus upgrade.
    pub handshake_timeout: Duration,
    /// Keep-alive settings.
    pub heartbeat: HeartbeatConfig,
}

impl TransportConfig {
    /// Configuration with default timings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_stream_settings(url: impl Into<String>, settings: &StreamSettings) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: settings.handshake_timeout,
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
        }
    }
}

/// Everything a [`Connector`] needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Stream URL.
    pub url: String,
    /// Extra upgrade headers (authentication).
    pub headers: Vec<(&'static str, String)>,
}

impl HandshakeRequest {
    /// Whether authentication headers are attached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.headers.is_empty()
    }
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// Connector backed by `tokio-tungstenite` over rustls.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: HandshakeRequest) -> Result<Connection, TransportError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        for (name, value) in &request.headers {
            let invalid = |e: &dyn std::fmt::Display| {
                TransportError::Connection(format!("invalid header {name}: {e}"))
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
            upgrade.headers_mut().insert(header, value);
        }

        let (stream, response) = tokio_tungstenite::connect_async(upgrade)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket upgrade complete");

        let (sink, stream) = stream.split();
        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Per-session handles guarded by the write lock.
#[derive(Default)]
struct Link {
    sink: Option<FrameSink>,
    cancel: Option<CancellationToken>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    credentials: Option<Credentials>,
    connector: Arc<dyn Connector>,
    codec: JsonCodec,
    handler: Arc<dyn EnvelopeHandler>,
    observer: Arc<dyn ConnectionObserver>,
    connect_lock: Mutex<()>,
    link: Mutex<Link>,
    connected: AtomicBool,
}

/// Single-connection WebSocket transport.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("url", &self.inner.config.url)
            .field("authenticated", &self.inner.credentials.is_some())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a transport. Nothing is dialed until [`Self::connect`].
    #[must_use]
    pub fn new(
        config: TransportConfig,
        credentials: Option<Credentials>,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EnvelopeHandler>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                connector,
                codec: JsonCodec::new(),
                handler,
                observer,
                connect_lock: Mutex::new(()),
                link: Mutex::new(Link::default()),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Whether credentials are configured.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.credentials.is_some()
    }

    /// Current connection state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Open a connection and start the read and keep-alive tasks.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a session is live (it is left untouched)
    /// - `Signature` if the auth headers cannot be signed
    /// - `HandshakeTimeout` / `Connection` if dialing or the upgrade fails
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _serial = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }

        // The previous session's tasks must finish before a new one starts
        // so its registry cleanup cannot land on top of the new session.
        self.inner.reap_tasks().await;

        let request = self.inner.handshake_request()?;
        tracing::info!(
            url = %request.url,
            authenticated = request.is_authenticated(),
            "Connecting to Kalshi stream"
        );

        let timeout = self.inner.config.handshake_timeout;
        let connection = tokio::time::timeout(timeout, self.inner.connector.connect(request))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(timeout))??;

        let cancel = CancellationToken::new();
        let generation = {
            let mut link = self.inner.link.lock().await;
            link.generation += 1;
            link.sink = Some(connection.sink);
            link.cancel = Some(cancel.clone());
            link.generation
        };
        self.inner.connected.store(true, Ordering::SeqCst);
        metrics::set_connected(true);
        tracing::info!(generation, "Kalshi stream connected");
        self.inner.observer.connected();

        let heartbeat = Arc::new(HeartbeatState::new());
        let reader = tokio::spawn(Arc::clone(&self.inner).read_loop(
            connection.stream,
            generation,
            cancel.clone(),
            Arc::clone(&heartbeat),
        ));
        let keepalive =
            tokio::spawn(Arc::clone(&self.inner).keepalive_loop(generation, cancel, heartbeat));

        let mut link = self.inner.link.lock().await;
        link.reader = Some(reader);
        link.keepalive = Some(keepalive);
        Ok(())
    }

    /// Write one text frame under the write lock.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a live session, or `Connection` if the
    /// write fails.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.inner.write(None, Message::Text(text.into())).await
    }

    /// Stop both tasks, send a best-effort close frame and drop the
    /// connection. A no-op when not connected.
    pub async fn close(&self) {
        let _serial = self.inner.connect_lock.lock().await;

        let sink = {
            let mut link = self.inner.link.lock().await;
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
            link.sink.take()
        };

        let Some(mut sink) = sink else {
            self.inner.reap_tasks().await;
            return;
        };

        self.inner.connected.store(false, Ordering::SeqCst);
        metrics::set_connected(false);
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            tracing::debug!(error = %e, "Close frame not delivered");
        }
        drop(sink);

        self.inner.reap_tasks().await;
        tracing::info!("Kalshi stream closed");
        self.inner.observer.disconnected(None);
    }
}

impl Inner {
    fn handshake_request(&self) -> Result<HandshakeRequest, TransportError> {
        let headers: Vec<(&'static str, String)> = match &self.credentials {
            Some(credentials) => credentials
                .auth_headers("GET", STREAM_PATH)?
                .pairs()
                .iter()
                .map(|(name, value)| (*name, (*value).to_string()))
                .collect(),
            None => Vec::new(),
        };

        Ok(HandshakeRequest {
            url: self.config.url.clone(),
            headers,
        })
    }

    /// Write a frame. With `Some(generation)` the write only goes through if
    /// that session is still current.
    async fn write(&self, generation: Option<u64>, message: Message) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        if generation.is_some_and(|g| g != link.generation) {
            return Err(TransportError::NotConnected);
        }
        let sink = link.sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    async fn reap_tasks(&self) {
        let (reader, keepalive) = {
            let mut link = self.link.lock().await;
            (link.reader.take(), link.keepalive.take())
        };
        for task in [keepalive, reader].into_iter().flatten() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Session task ended abnormally");
            }
        }
    }

    /// End `generation` if it is still the live session.
    async fn teardown(&self, generation: u64, reason: Option<TransportError>) {
        let sink = {
            let mut link = self.link.lock().await;
            if link.generation != generation || link.sink.is_none() {
                return;
            }
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
            link.sink.take()
        };

        self.connected.store(false, Ordering::SeqCst);
        metrics::set_connected(false);
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }

        match &reason {
            Some(err) => tracing::warn!(generation, error = %err, "Kalshi stream disconnected"),
            None => tracing::info!(generation, "Kalshi stream closed by server"),
        }
        self.observer.disconnected(reason.as_ref());
    }

    async fn read_loop(
        self: Arc<Self>,
        mut stream: FrameStream,
        generation: u64,
        cancel: CancellationToken,
        heartbeat: Arc<HeartbeatState>,
    ) {
        let reason = loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break None,
                frame = stream.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => break None,
                Some(Err(e)) => break Some(TransportError::ConnectionClosed(e.to_string())),
                None => break Some(TransportError::ConnectionClosed("stream ended".to_string())),
            };
            heartbeat.record_pong();

            match message {
                Message::Text(text) => self.process(self.codec.decode(text.as_str())),
                Message::Binary(bytes) => self.process(self.codec.decode_bytes(&bytes)),
                Message::Ping(payload) => {
                    if let Err(e) = self.write(Some(generation), Message::Pong(payload)).await {
                        tracing::debug!(error = %e, "Pong reply failed");
                    }
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "Close frame received");
                    break None;
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        };

        self.handler.session_ended();
        self.teardown(generation, reason).await;
    }

    fn process(&self, decoded: Result<Envelope, CodecError>) {
        let started = Instant::now();
        match decoded {
            Ok(envelope) => {
                metrics::record_frame_received(envelope.kind());
                self.handler.handle(envelope);
            }
            Err(e) => {
                metrics::record_protocol_error();
                tracing::warn!(error = %e, "Dropping malformed frame");
                self.observer.errored(&TransportError::Protocol(e));
            }
        }
        metrics::record_processing_duration(started.elapsed());
    }

    async fn keepalive_loop(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        heartbeat: Arc<HeartbeatState>,
    ) {
        let probe = SessionProbe {
            inner: Arc::clone(&self),
            generation,
        };
        let manager = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            heartbeat,
            probe,
            cancel.clone(),
        );

        if let Err(e) = manager.run().await {
            if cancel.is_cancelled() {
                return;
            }
            let err = TransportError::Heartbeat(e);
            self.observer.errored(&err);
            self.teardown(generation, Some(err)).await;
        }
    }
}

/// Probe bound to one session.
struct SessionProbe {
    inner: Arc<Inner>,
    generation: u64,
}

#[async_trait]
impl LivenessProbe for SessionProbe {
    async fn send_probe(&self) -> Result<(), String> {
        self.inner
            .write(Some(self.generation), Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| e.to_string())
    }
}
