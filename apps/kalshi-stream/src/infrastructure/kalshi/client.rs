//! Stream Client
//!
//! Composes the transport, router, registry and dispatcher into one object
//! holding a single authenticated connection. The client does not reconnect;
//! wrap it in a [`ReconnectSupervisor`](super::supervisor::ReconnectSupervisor)
//! for that.

use std::collections::HashMap;
use std::sync::Arc;

use crate::infrastructure::kalshi::ports::{ConnectionObserver, Connector, DataHandler, Discard, MessageSink};
use crate::domain::subscription::{Channel, CommandId, Sid, SubscriptionRegistry};
use crate::infrastructure::kalshi::auth::Credentials;
use crate::infrastructure::kalshi::dispatcher::{ClientError, CommandDispatcher};
use crate::infrastructure::kalshi::messages::UpdateSubscriptionParams;
use crate::infrastructure::kalshi::router::MessageRouter;
use crate::infrastructure::kalshi::transport::{
    Transport, TransportConfig, TransportError, WsConnector,
};

/// Caller-supplied handlers.
#[derive(Clone)]
pub struct Handlers {
    /// Lifecycle notifications.
    pub observer: Arc<dyn ConnectionObserver>,
    /// Acknowledgements and server errors.
    pub messages: Arc<dyn MessageSink>,
    /// Streaming data.
    pub data: Arc<dyn DataHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            observer: Arc::new(Discard),
            messages: Arc::new(Discard),
            data: Arc::new(Discard),
        }
    }
}

impl Handlers {
    /// Use one object for every port.
    #[must_use]
    pub fn shared<H>(hub: Arc<H>) -> Self
    where
        H: ConnectionObserver + MessageSink + DataHandler + 'static,
    {
        Self {
            observer: Arc::clone(&hub) as Arc<dyn ConnectionObserver>,
            messages: Arc::clone(&hub) as Arc<dyn MessageSink>,
            data: hub,
        }
    }
}

/// Authenticated subscription client over one connection.
#[derive(Debug)]
pub struct StreamClient {
    transport: Transport,
    dispatcher: CommandDispatcher,
    registry: Arc<SubscriptionRegistry>,
}

impl StreamClient {
    /// Create a client using the `tokio-tungstenite` connector.
    #[must_use]
    pub fn new(
        config: TransportConfig,
        credentials: Option<Credentials>,
        handlers: Handlers,
    ) -> Self {
        Self::with_connector(config, credentials, handlers, Arc::new(WsConnector))
    }

    /// Create a client with a custom connector.
    #[must_use]
    pub fn with_connector(
        config: TransportConfig,
        credentials: Option<Credentials>,
        handlers: Handlers,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry), handlers.messages, handlers.data);
        let transport = Transport::new(
            config,
            credentials,
            connector,
            Arc::new(router),
            handlers.observer,
        );

        Self {
            dispatcher: CommandDispatcher::new(transport.clone()),
            transport,
            registry,
        }
    }

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// See [`Transport::connect`].
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    /// Close the connection. A no-op when not connected.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Current connection state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Whether credentials are configured.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.transport.is_authenticated()
    }

    /// Subscribe `channels` for one market.
    ///
    /// Returns the local command id; the `subscribed` ack arrives later
    /// through the message sink with the same id.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is written.
    pub async fn subscribe(
        &self,
        channels: &[Channel],
        market_ticker: &str,
    ) -> Result<CommandId, ClientError> {
        self.dispatcher.subscribe(channels, market_ticker).await
    }

    /// Subscribe by channel name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for an unknown name before anything is
    /// written.
    pub async fn subscribe_named(
        &self,
        channels: &[&str],
        market_ticker: &str,
    ) -> Result<CommandId, ClientError> {
        let command = self
            .dispatcher
            .build_subscribe_named(channels, market_ticker)?;
        self.dispatcher.dispatch(&command).await
    }

    /// Close subscriptions by SID.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty list, otherwise write errors.
    pub async fn unsubscribe(&self, sids: Vec<Sid>) -> Result<CommandId, ClientError> {
        self.dispatcher.unsubscribe(sids).await
    }

    /// Ask the server to list our subscriptions. The answer arrives as `ok`.
    ///
    /// # Errors
    ///
    /// Returns write errors.
    pub async fn list_subscriptions(&self) -> Result<CommandId, ClientError> {
        self.dispatcher.list_subscriptions().await
    }

    /// Add or remove markets on existing subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed parameters, otherwise write errors.
    pub async fn update_subscription(
        &self,
        params: UpdateSubscriptionParams,
    ) -> Result<CommandId, ClientError> {
        self.dispatcher.update_subscription(params).await
    }

    /// Consistent snapshot of server-confirmed subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> HashMap<Sid, Channel> {
        self.registry.snapshot()
    }

    /// The dispatcher, for callers that correlate ids before writing.
    #[must_use]
    pub const fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }
}
