//! In-memory connections for unit tests.
//!
//! Every `connect` hands out a fresh connection whose server side is a
//! [`Peer`]: tests push inbound frames through it and inspect what the
//! client wrote.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Sink;
use futures::channel::mpsc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::ports::{Connection, Connector};
use super::transport::{HandshakeRequest, TransportError};

/// Sink that records every frame written. Ping writes fail when
/// `refuse_pings` is set.
struct RecordingSink {
    frames: Arc<Mutex<Vec<Message>>>,
    refuse_pings: bool,
}

impl Sink<Message> for RecordingSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        if self.refuse_pings && matches!(item, Message::Ping(_)) {
            return Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "socket gone",
            )));
        }
        self.frames.lock().push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }
}

/// Server side of one in-memory connection.
#[derive(Clone)]
pub struct Peer {
    inbound: mpsc::UnboundedSender<Result<Message, WsError>>,
    frames: Arc<Mutex<Vec<Message>>>,
}

impl Peer {
    /// Deliver a frame to the client.
    pub fn send(&self, message: Message) {
        let _ = self.inbound.unbounded_send(Ok(message));
    }

    /// Deliver a text frame to the client.
    pub fn send_text(&self, text: &str) {
        self.send(Message::Text(text.into()));
    }

    /// End the inbound stream without a close frame.
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }

    /// Whether the client dropped its read half.
    pub fn is_released(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Every frame the client wrote.
    pub fn frames(&self) -> Vec<Message> {
        self.frames.lock().clone()
    }

    /// Text frames the client wrote, decoded as JSON.
    pub fn commands(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
                _ => None,
            })
            .collect()
    }
}

/// Connector that opens in-memory connections.
#[derive(Default)]
pub struct LoopbackConnector {
    peers: Mutex<Vec<Peer>>,
    requests: Mutex<Vec<HandshakeRequest>>,
    refuse_pings: bool,
}

impl LoopbackConnector {
    /// Connections whose probe writes fail.
    pub fn refusing_pings() -> Self {
        Self {
            refuse_pings: true,
            ..Self::default()
        }
    }

    /// Server side of the most recent connection.
    pub fn latest(&self) -> Peer {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no connection opened yet")
    }

    /// Handshake requests in dial order.
    pub fn requests(&self) -> Vec<HandshakeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, request: HandshakeRequest) -> Result<Connection, TransportError> {
        self.requests.lock().push(request);
        let (inbound, stream) = mpsc::unbounded();
        let frames = Arc::new(Mutex::new(Vec::new()));
        self.peers.lock().push(Peer {
            inbound,
            frames: Arc::clone(&frames),
        });

        Ok(Connection {
            sink: Box::pin(RecordingSink {
                frames,
                refuse_pings: self.refuse_pings,
            }),
            stream: Box::pin(stream),
        })
    }
}
