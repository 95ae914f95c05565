#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Kalshi Stream - Durable Market Data Subscription Client
//!
//! Maintains one authenticated WebSocket connection to Kalshi's streaming
//! API, issues correlated commands, routes asynchronous server messages to
//! caller-supplied handlers, and restores the caller's subscriptions after
//! every reconnect.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Channel vocabulary and subscription views
//!   - `subscription`: Server-confirmed registry and caller-desired set
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kalshi`: Ports, signing, transport, dispatcher, router, supervisor
//!   - `broadcast`: Channel-based event distribution
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌────────────┐  subscribe/unsubscribe  ┌───────────┐
//!  Caller ────────────►│ Supervisor │────────────────────────►│ Dispatcher│──┐
//!     ▲                └────────────┘                         └───────────┘  │
//!     │                      │ check / replay                                ▼
//!     │                      ▼                                        ┌───────────┐
//!     │  acks, errors  ┌────────────┐     envelopes    ┌──────────┐   │ Transport │◄──► Kalshi WS
//!     └────────────────│   Router   │◄─────────────────│  Codec   │◄──│ read task │
//!        data          └────────────┘                  └──────────┘   └───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Subscription types with no protocol knowledge.
pub mod domain;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::subscription::{
    Channel, CommandId, DesiredSet, DesiredSubscription, Sid, Subscription, SubscriptionRegistry,
    ValidationError,
};

// Ports
pub use infrastructure::kalshi::ports::{
    ConnectionObserver, Connector, DataHandler, Discard, EnvelopeHandler, MessageSink,
};

// Infrastructure config
pub use infrastructure::config::{
    AuthSettings, BroadcastSettings, ConfigError, Environment, PrivateKeySource, ServerSettings,
    StreamConfig, StreamSettings,
};

// Client surface
pub use infrastructure::kalshi::{
    ClientError, Credentials, Envelope, EnvelopeBody, Handlers, ReconnectSupervisor,
    SignatureError, Signer, StreamClient, SupervisorConfig, TransportConfig, TransportError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, DataBroadcast, SharedStreamEvents, StreamEvent, StreamEvents,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
