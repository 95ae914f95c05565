//! Port Interfaces
//!
//! Defines the interfaces (ports) for collaborators at the boundary of the
//! protocol core, following the Hexagonal Architecture pattern. They live
//! beside the wire types they carry.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens one physical framed connection
//! - `EnvelopeHandler`: receives decoded envelopes from the read task
//!
//! ## Driver Ports (Inbound to the caller)
//!
//! - `ConnectionObserver`: lifecycle notifications (connected, disconnected, errored)
//! - `MessageSink`: acknowledgements and server errors
//! - `DataHandler`: opaque streaming payloads

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::messages::Envelope;
use super::transport::{HandshakeRequest, TransportError};

// =============================================================================
// Connection Ports
// =============================================================================

/// Write half of a framed connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of a framed connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// An established framed connection, already split into its two halves.
pub struct Connection {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

/// Opens physical connections on behalf of the transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial and complete the upgrade handshake.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connection` if dialing or the handshake fails.
    async fn connect(&self, request: HandshakeRequest) -> Result<Connection, TransportError>;
}

/// Consumes decoded envelopes. Invoked only from the read task.
pub trait EnvelopeHandler: Send + Sync {
    /// Handle one inbound envelope.
    fn handle(&self, envelope: Envelope);

    /// The connection that produced earlier envelopes has ended.
    fn session_ended(&self);
}

// =============================================================================
// Caller Ports
// =============================================================================

/// Connection lifecycle observer.
///
/// Callbacks run on transport tasks and must not block.
pub trait ConnectionObserver: Send + Sync {
    /// A connection was established.
    fn connected(&self);

    /// The connection ended. `None` means a requested or clean close.
    fn disconnected(&self, reason: Option<&TransportError>);

    /// A non-fatal or terminal error occurred.
    fn errored(&self, error: &TransportError);
}

/// Receives `subscribed`, `unsubscribed`, `ok` and `error` envelopes.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    /// Route one control envelope.
    fn route(&self, envelope: &Envelope);
}

/// Receives `data` envelopes. The payload is not interpreted by the core.
#[cfg_attr(test, mockall::automock)]
pub trait DataHandler: Send + Sync {
    /// Handle one data envelope.
    fn on_data(&self, envelope: &Envelope);
}

/// Port implementation that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ConnectionObserver for Discard {
    fn connected(&self) {}

    fn disconnected(&self, _reason: Option<&TransportError>) {}

    fn errored(&self, _error: &TransportError) {}
}

impl MessageSink for Discard {
    fn route(&self, _envelope: &Envelope) {}
}

impl DataHandler for Discard {
    fn on_data(&self, _envelope: &Envelope) {}
}
