//! Command Dispatcher
//!
//! Validates typed requests, stamps them with a local command id and writes
//! them through the transport.
//!
//! The protocol is fire-and-forget: the dispatcher returns the allocated id
//! as soon as the frame is written. Matching that id to the eventual
//! `subscribed` / `ok` / `error` envelope is the caller's job.
//!
//! Building and writing are separate steps so a caller can record the id
//! for correlation before the server has any chance to answer it.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::domain::subscription::{Channel, CommandId, Sid, ValidationError};
use crate::infrastructure::kalshi::codec::{CodecError, JsonCodec};
use crate::infrastructure::kalshi::messages::{
    Command, SubscribeParams, UnsubscribeParams, UpdateSubscriptionParams,
};
use crate::infrastructure::kalshi::transport::{Transport, TransportError};
use crate::infrastructure::metrics;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request was rejected locally; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The write failed or there is no connection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The command could not be serialized.
    #[error(transparent)]
    Encode(#[from] CodecError),
}

// =============================================================================
// ID Allocation
// =============================================================================

/// Monotonic source of local command ids, starting at 1.
///
/// Ids are never reused for the lifetime of the allocator, including across
/// reconnects.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Create an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Take the next id.
    pub fn allocate(&self) -> CommandId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Turns requests into correlated command frames.
#[derive(Debug)]
pub struct CommandDispatcher {
    transport: Transport,
    ids: IdAllocator,
    codec: JsonCodec,
}

impl CommandDispatcher {
    /// Create a dispatcher writing through `transport`.
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            ids: IdAllocator::new(),
            codec: JsonCodec::new(),
        }
    }

    /// Check a subscribe request without allocating an id.
    ///
    /// # Errors
    ///
    /// - `InvalidParams` for an empty channel list or ticker
    /// - `AuthRequired` for an authenticated channel without credentials
    pub fn validate_subscribe(
        &self,
        channels: &[Channel],
        market_ticker: &str,
    ) -> Result<SubscribeParams, ValidationError> {
        if channels.is_empty() {
            return Err(ValidationError::InvalidParams(
                "at least one channel is required".to_string(),
            ));
        }
        if market_ticker.trim().is_empty() {
            return Err(ValidationError::InvalidParams(
                "market ticker cannot be empty".to_string(),
            ));
        }
        if !self.transport.is_authenticated() {
            if let Some(channel) = channels.iter().find(|c| c.requires_auth()) {
                return Err(ValidationError::AuthRequired(*channel));
            }
        }

        Ok(SubscribeParams {
            channels: channels.to_vec(),
            market_ticker: market_ticker.to_string(),
        })
    }

    /// Build a `subscribe` command.
    ///
    /// # Errors
    ///
    /// See [`Self::validate_subscribe`].
    pub fn build_subscribe(
        &self,
        channels: &[Channel],
        market_ticker: &str,
    ) -> Result<Command, ValidationError> {
        let params = self.validate_subscribe(channels, market_ticker)?;
        Ok(Command::subscribe(self.ids.allocate(), params))
    }

    /// Build a `subscribe` command from channel names.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for an unknown name, otherwise see
    /// [`Self::validate_subscribe`].
    pub fn build_subscribe_named(
        &self,
        channels: &[&str],
        market_ticker: &str,
    ) -> Result<Command, ValidationError> {
        let channels = channels
            .iter()
            .map(|name| name.parse::<Channel>())
            .collect::<Result<Vec<_>, _>>()?;
        self.build_subscribe(&channels, market_ticker)
    }

    /// Build an `unsubscribe` command.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for an empty SID list.
    pub fn build_unsubscribe(&self, sids: Vec<Sid>) -> Result<Command, ValidationError> {
        if sids.is_empty() {
            return Err(ValidationError::InvalidParams(
                "at least one sid is required".to_string(),
            ));
        }
        Ok(Command::unsubscribe(
            self.ids.allocate(),
            UnsubscribeParams { sids },
        ))
    }

    /// Build a `list_subscriptions` command.
    pub fn build_list(&self) -> Command {
        Command::list_subscriptions(self.ids.allocate())
    }

    /// Build an `update_subscription` command.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` without a target SID or without tickers.
    pub fn build_update(&self, params: UpdateSubscriptionParams) -> Result<Command, ValidationError> {
        if !params.has_target() {
            return Err(ValidationError::InvalidParams(
                "update requires sid or sids".to_string(),
            ));
        }
        if params.market_tickers.is_empty() {
            return Err(ValidationError::InvalidParams(
                "update requires at least one market ticker".to_string(),
            ));
        }
        Ok(Command::update_subscription(self.ids.allocate(), params))
    }

    /// Encode and write a built command.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if serialization fails or `Transport` if the write
    /// fails.
    pub async fn dispatch(&self, command: &Command) -> Result<CommandId, ClientError> {
        let frame = self.codec.encode(command)?;
        self.transport.send_text(frame).await?;

        metrics::record_command_sent(command.kind().as_str());
        tracing::debug!(id = command.id(), cmd = command.kind().as_str(), "Command sent");
        Ok(command.id())
    }

    /// Validate and send a `subscribe` command.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is written.
    pub async fn subscribe(
        &self,
        channels: &[Channel],
        market_ticker: &str,
    ) -> Result<CommandId, ClientError> {
        let command = self.build_subscribe(channels, market_ticker)?;
        self.dispatch(&command).await
    }

    /// Send an `unsubscribe` command.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty SID list, otherwise write errors.
    pub async fn unsubscribe(&self, sids: Vec<Sid>) -> Result<CommandId, ClientError> {
        let command = self.build_unsubscribe(sids)?;
        self.dispatch(&command).await
    }

    /// Send a `list_subscriptions` command.
    ///
    /// # Errors
    ///
    /// Returns write errors.
    pub async fn list_subscriptions(&self) -> Result<CommandId, ClientError> {
        let command = self.build_list();
        self.dispatch(&command).await
    }

    /// Send an `update_subscription` command.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed parameters, otherwise write errors.
    pub async fn update_subscription(
        &self,
        params: UpdateSubscriptionParams,
    ) -> Result<CommandId, ClientError> {
        let command = self.build_update(params)?;
        self.dispatch(&command).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::infrastructure::kalshi::ports::{Connection, Connector, Discard};
    use crate::infrastructure::kalshi::messages::CommandKind;
    use crate::infrastructure::kalshi::transport::{HandshakeRequest, TransportConfig};

    struct Unreachable;

    #[async_trait::async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, _request: HandshakeRequest) -> Result<Connection, TransportError> {
            Err(TransportError::Connection("unreachable".to_string()))
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let transport = Transport::new(
            TransportConfig::new("wss://example.invalid/trade-api/ws/v2"),
            None,
            Arc::new(Unreachable),
            Arc::new(crate::infrastructure::kalshi::router::MessageRouter::new(
                Arc::default(),
                Arc::new(Discard),
                Arc::new(Discard),
            )),
            Arc::new(Discard),
        );
        CommandDispatcher::new(transport)
    }

    #[test]
    fn allocator_starts_at_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.allocate(), 1);
        assert_eq!(ids.allocate(), 2);
    }

    #[test_case(Channel::Fill ; "fill")]
    #[test_case(Channel::Positions ; "positions")]
    fn authenticated_channel_requires_credentials(channel: Channel) {
        let err = dispatcher().build_subscribe(&[channel], "ABC").unwrap_err();
        assert_eq!(err, ValidationError::AuthRequired(channel));
    }

    #[test]
    fn public_channels_build_without_credentials() {
        let d = dispatcher();
        let cmd = d
            .build_subscribe(&[Channel::Ticker, Channel::Trade], "ABC")
            .unwrap();
        assert_eq!(cmd.kind(), CommandKind::Subscribe);
        assert_eq!(cmd.id(), 1);
    }

    #[test]
    fn unknown_channel_name_is_rejected() {
        let err = dispatcher()
            .build_subscribe_named(&["bogus"], "ABC")
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidChannel("bogus".to_string()));
    }

    #[test]
    fn rejected_requests_do_not_consume_ids() {
        let d = dispatcher();
        assert!(d.build_subscribe(&[Channel::Fill], "ABC").is_err());
        assert!(d.build_unsubscribe(vec![]).is_err());
        assert_eq!(d.build_list().id(), 1);
    }

    #[test]
    fn update_requires_target_and_tickers() {
        let d = dispatcher();
        assert!(d.build_update(UpdateSubscriptionParams::add_markets(1, vec![])).is_err());
        assert!(
            d.build_update(UpdateSubscriptionParams::delete_markets(1, vec!["X".to_string()]))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn dispatch_without_connection_fails() {
        let err = dispatcher().list_subscriptions().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn validation_failure_is_reported_before_transport() {
        let err = dispatcher()
            .subscribe(&[Channel::Positions], "ABC")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::AuthRequired(Channel::Positions))
        ));
    }

    #[derive(Debug, Clone)]
    enum Request {
        Subscribe,
        Unsubscribe,
        List,
        Update,
    }

    fn request_strategy() -> impl Strategy<Value = Request> {
        prop_oneof![
            Just(Request::Subscribe),
            Just(Request::Unsubscribe),
            Just(Request::List),
            Just(Request::Update),
        ]
    }

    proptest! {
        #[test]
        fn ids_are_strictly_increasing(requests in proptest::collection::vec(request_strategy(), 1..64)) {
            let d = dispatcher();
            let ids: Vec<CommandId> = requests
                .iter()
                .map(|r| match r {
                    Request::Subscribe => d.build_subscribe(&[Channel::Ticker], "ABC").unwrap().id(),
                    Request::Unsubscribe => d.build_unsubscribe(vec![7]).unwrap().id(),
                    Request::List => d.build_list().id(),
                    Request::Update => d
                        .build_update(UpdateSubscriptionParams::add_markets(7, vec!["X".to_string()]))
                        .unwrap()
                        .id(),
                })
                .collect();

            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
