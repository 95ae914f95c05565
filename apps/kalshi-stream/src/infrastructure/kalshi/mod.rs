//! Kalshi WebSocket Adapters
//!
//! Implements the authenticated streaming client for Kalshi's
//! `/trade-api/ws/v2` endpoint:
//!
//! - **Ports**: connector, envelope handler, and caller-facing handler traits
//! - **Auth**: RSA-PSS request signing and handshake headers
//! - **Transport**: one WebSocket session with keepalive and a read task
//! - **Dispatcher**: command ids, validation, and command encoding
//! - **Router**: envelope classification and registry maintenance
//! - **Supervisor**: desired-set replay across reconnects

pub mod auth;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod heartbeat;
#[cfg(test)]
pub(crate) mod loopback;
pub mod messages;
pub mod ports;
pub mod reconnect;
pub mod router;
pub mod supervisor;
pub mod transport;

pub use auth::{AuthHeaders, Credentials, SignatureError, Signer};
pub use client::{Handlers, StreamClient};
pub use codec::{CodecError, JsonCodec};
pub use dispatcher::{ClientError, CommandDispatcher, IdAllocator};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatManager, HeartbeatState};
pub use messages::*;
pub use ports::{
    Connection, ConnectionObserver, Connector, DataHandler, Discard, EnvelopeHandler, FrameSink,
    FrameStream, MessageSink,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use router::MessageRouter;
pub use supervisor::{ReconnectSupervisor, SubscriptionTracker, SupervisorConfig};
pub use transport::{
    HandshakeRequest, Transport, TransportConfig, TransportError, WsConnector,
};
