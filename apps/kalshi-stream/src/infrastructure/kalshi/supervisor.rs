//! Reconnect Supervisor
//!
//! Makes subscriptions durable across connection churn. The supervisor owns
//! the desired set, keyed by `(channel, ticker)` because SIDs die with their
//! connection, and a liveness loop that reconnects and replays it.
//!
//! # Locking
//!
//! One async mutex guards the desired set and is held for the whole
//! "observe disconnected, reconnect, replay" pass. A concurrent
//! `subscribe` either lands before the pass (and is replayed by it) or after
//! it (and is written to the fresh connection).
//!
//! # SID Correlation
//!
//! The `subscribed` ack carries the command id but not the ticker, so the
//! supervisor remembers which pair each of its subscribe commands was for.
//! That gives `unsubscribe(channel, ticker)` the SID to send. An ack for a
//! pair withdrawn while its subscribe was in flight is answered with an
//! automatic unsubscribe, but only on the connection that issued the SID.
//! Every reconnect starts a new epoch and orphans from older epochs are
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::kalshi::ports::{ConnectionObserver, Connector, MessageSink};
use crate::domain::subscription::{Channel, CommandId, DesiredSet, DesiredSubscription, Sid};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::kalshi::auth::Credentials;
use crate::infrastructure::kalshi::client::{Handlers, StreamClient};
use crate::infrastructure::kalshi::dispatcher::ClientError;
use crate::infrastructure::kalshi::messages::{Envelope, EnvelopeBody};
use crate::infrastructure::kalshi::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::kalshi::transport::{TransportConfig, TransportError, WsConnector};
use crate::infrastructure::metrics::{self, ReconnectOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Liveness check period while connected.
    pub check_interval: Duration,
    /// Waits between failed connection attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            check_interval: settings.liveness_interval,
            reconnect: ReconnectConfig::from_stream_settings(settings),
        }
    }
}

// =============================================================================
// Subscription Tracker
// =============================================================================

#[derive(Debug)]
struct Pending {
    pair: DesiredSubscription,
    withdrawn: bool,
}

#[derive(Debug, Default)]
struct Correlation {
    epoch: u64,
    pending: HashMap<CommandId, Pending>,
    active: HashMap<DesiredSubscription, Sid>,
}

/// SID acked for a pair that was withdrawn while its subscribe was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Orphan {
    epoch: u64,
    sid: Sid,
}

/// Message sink that learns SIDs for the supervisor's own subscribe
/// commands, then forwards every envelope to the caller's sink.
pub struct SubscriptionTracker {
    downstream: Arc<dyn MessageSink>,
    state: parking_lot::Mutex<Correlation>,
    orphans: mpsc::UnboundedSender<Orphan>,
}

impl SubscriptionTracker {
    fn new(downstream: Arc<dyn MessageSink>) -> (Self, mpsc::UnboundedReceiver<Orphan>) {
        let (orphans, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            downstream,
            state: parking_lot::Mutex::new(Correlation::default()),
            orphans,
        };
        (tracker, rx)
    }

    fn track(&self, id: CommandId, pair: DesiredSubscription) {
        self.state.lock().pending.insert(
            id,
            Pending {
                pair,
                withdrawn: false,
            },
        );
    }

    fn forget(&self, id: CommandId) {
        self.state.lock().pending.remove(&id);
    }

    /// Whether the pair is confirmed or has a live subscribe in flight.
    fn is_tracked(&self, pair: &DesiredSubscription) -> bool {
        let state = self.state.lock();
        state.active.contains_key(pair)
            || state
                .pending
                .values()
                .any(|p| !p.withdrawn && &p.pair == pair)
    }

    /// Stop tracking the pair, returning its confirmed SID if known.
    fn withdraw(&self, pair: &DesiredSubscription) -> Option<Sid> {
        let mut state = self.state.lock();
        for pending in state.pending.values_mut() {
            if &pending.pair == pair {
                pending.withdrawn = true;
            }
        }
        state.active.remove(pair)
    }

    /// SID confirmed for the pair on the current connection.
    #[must_use]
    pub fn active_sid(&self, pair: &DesiredSubscription) -> Option<Sid> {
        self.state.lock().active.get(pair).copied()
    }

    /// Connection epoch the tracker is currently learning SIDs for.
    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Forget everything learned on the previous connection and start a new
    /// epoch.
    fn reset(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.pending.clear();
        state.active.clear();
    }
}

impl MessageSink for SubscriptionTracker {
    fn route(&self, envelope: &Envelope) {
        {
            let mut state = self.state.lock();
            match (&envelope.body, envelope.id) {
                (EnvelopeBody::Subscribed(msg), Some(id)) => {
                    if let Some(pending) = state.pending.remove(&id) {
                        if pending.withdrawn {
                            let orphan = Orphan {
                                epoch: state.epoch,
                                sid: msg.sid,
                            };
                            if self.orphans.send(orphan).is_err() {
                                tracing::debug!(sid = msg.sid, "Orphan channel closed");
                            }
                        } else {
                            state.active.insert(pending.pair, msg.sid);
                        }
                    }
                }
                (EnvelopeBody::Error(_), Some(id)) => {
                    state.pending.remove(&id);
                }
                (EnvelopeBody::Unsubscribed, _) => {
                    if let Some(sid) = envelope.sid {
                        state.active.retain(|_, active| *active != sid);
                    }
                }
                _ => {}
            }
        }
        self.downstream.route(envelope);
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Keeps the desired subscription set alive across reconnects.
pub struct ReconnectSupervisor {
    client: StreamClient,
    tracker: Arc<SubscriptionTracker>,
    desired: Mutex<DesiredSet>,
    desired_len: AtomicUsize,
    observer: Arc<dyn ConnectionObserver>,
    config: SupervisorConfig,
    orphans: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Orphan>>>,
}

impl ReconnectSupervisor {
    /// Create a supervisor using the `tokio-tungstenite` connector.
    #[must_use]
    pub fn new(
        transport: TransportConfig,
        credentials: Option<Credentials>,
        handlers: Handlers,
        config: SupervisorConfig,
    ) -> Self {
        Self::with_connector(transport, credentials, handlers, config, Arc::new(WsConnector))
    }

    /// Create a supervisor with a custom connector.
    #[must_use]
    pub fn with_connector(
        transport: TransportConfig,
        credentials: Option<Credentials>,
        handlers: Handlers,
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (tracker, orphans) = SubscriptionTracker::new(handlers.messages);
        let tracker = Arc::new(tracker);
        let observer = Arc::clone(&handlers.observer);
        let client = StreamClient::with_connector(
            transport,
            credentials,
            Handlers {
                observer: handlers.observer,
                messages: Arc::clone(&tracker) as Arc<dyn MessageSink>,
                data: handlers.data,
            },
            connector,
        );

        Self {
            client,
            tracker,
            desired: Mutex::new(DesiredSet::new()),
            desired_len: AtomicUsize::new(0),
            observer,
            config,
            orphans: parking_lot::Mutex::new(Some(orphans)),
        }
    }

    /// The underlying client, for list/update commands and status queries.
    #[must_use]
    pub const fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Current connection state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Server-confirmed subscriptions on the current connection.
    #[must_use]
    pub fn active_subscriptions(&self) -> HashMap<Sid, Channel> {
        self.client.active_subscriptions()
    }

    /// SID currently serving a desired pair, if confirmed.
    #[must_use]
    pub fn sid_for(&self, pair: &DesiredSubscription) -> Option<Sid> {
        self.tracker.active_sid(pair)
    }

    /// Size of the desired set, without waiting on an in-flight reconnect.
    #[must_use]
    pub fn desired_len(&self) -> usize {
        self.desired_len.load(Ordering::Relaxed)
    }

    /// Snapshot of the desired set.
    pub async fn desired(&self) -> Vec<DesiredSubscription> {
        self.desired.lock().await.to_vec()
    }

    /// Add `(channel, ticker)` to the desired set and subscribe it on the
    /// current connection.
    ///
    /// Returns the command id when a subscribe was written, `None` when the
    /// intent was only recorded (disconnected, or already active).
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unknown channel, an empty ticker, or an
    /// authenticated channel without credentials. Nothing is recorded then.
    pub async fn subscribe(
        &self,
        channel: &str,
        ticker: &str,
    ) -> Result<Option<CommandId>, ClientError> {
        let pair = DesiredSubscription::parse(channel, ticker)?;
        self.subscribe_pair(pair).await
    }

    /// [`Self::subscribe`] for an already parsed pair.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn subscribe_pair(
        &self,
        pair: DesiredSubscription,
    ) -> Result<Option<CommandId>, ClientError> {
        self.client
            .dispatcher()
            .validate_subscribe(&[pair.channel], &pair.ticker)?;

        let mut desired = self.desired.lock().await;
        desired.insert(pair.clone());
        self.record_desired(desired.len());

        if !self.client.is_connected() || self.tracker.is_tracked(&pair) {
            tracing::debug!(%pair, "Subscription recorded for replay");
            return Ok(None);
        }
        Ok(self.issue(&pair).await)
    }

    /// Remove `(channel, ticker)` from the desired set and unsubscribe it if
    /// the server has confirmed it.
    ///
    /// Succeeds locally while disconnected.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unknown channel or empty ticker.
    pub async fn unsubscribe(
        &self,
        channel: &str,
        ticker: &str,
    ) -> Result<Option<CommandId>, ClientError> {
        let pair = DesiredSubscription::parse(channel, ticker)?;
        Ok(self.unsubscribe_pair(&pair).await)
    }

    /// [`Self::unsubscribe`] for an already parsed pair.
    pub async fn unsubscribe_pair(&self, pair: &DesiredSubscription) -> Option<CommandId> {
        let mut desired = self.desired.lock().await;
        desired.remove(pair);
        self.record_desired(desired.len());

        let sid = self.tracker.withdraw(pair)?;
        if !self.client.is_connected() {
            return None;
        }
        match self.client.unsubscribe(vec![sid]).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(%pair, sid, error = %e, "Unsubscribe not written");
                None
            }
        }
    }

    /// One liveness pass: reconnect and replay if disconnected.
    ///
    /// Returns `true` when a reconnect happened.
    ///
    /// # Errors
    ///
    /// Returns the connection error if reconnecting failed.
    pub async fn check(&self) -> Result<bool, TransportError> {
        let desired = self.desired.lock().await;
        if self.client.is_connected() {
            return Ok(false);
        }

        match self.client.connect().await {
            Ok(()) | Err(TransportError::AlreadyConnected) => {}
            Err(e) => return Err(e),
        }
        self.tracker.reset();

        let mut replayed = 0usize;
        for pair in desired.iter() {
            if self.issue(pair).await.is_some() {
                replayed += 1;
            }
        }
        tracing::info!(
            desired = desired.len(),
            replayed,
            "Reconnected and replayed subscriptions"
        );
        Ok(true)
    }

    /// Run the liveness loop until `cancel` fires, then close the client.
    ///
    /// The first check runs immediately.
    ///
    /// # Errors
    ///
    /// Returns `ReconnectExhausted` once the attempt cap is reached; the
    /// observer is told before this returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), TransportError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut orphans = self.orphans.lock().take();
        let mut wait = Duration::ZERO;

        loop {
            let deadline = tokio::time::sleep(wait);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!("Supervisor shutting down");
                        self.client.close().await;
                        return Ok(());
                    }
                    () = &mut deadline => break,
                    Some(orphan) = next_orphan(&mut orphans) => self.reconcile(orphan).await,
                }
            }

            match self.check().await {
                Ok(reconnected) => {
                    if reconnected {
                        metrics::record_reconnect(ReconnectOutcome::Success);
                        policy.reset();
                    }
                    wait = self.config.check_interval;
                }
                Err(e) => {
                    metrics::record_reconnect(ReconnectOutcome::Failure);
                    tracing::warn!(
                        attempt = policy.attempt_count() + 1,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    self.observer.errored(&e);

                    if let Some(delay) = policy.next_delay() {
                        wait = delay;
                    } else {
                        let err = TransportError::ReconnectExhausted(policy.attempt_count());
                        metrics::record_reconnect(ReconnectOutcome::Exhausted);
                        tracing::error!(error = %err, "Giving up on reconnecting");
                        self.observer.errored(&err);
                        self.client.close().await;
                        return Err(err);
                    }
                }
            }
        }
    }

    fn record_desired(&self, len: usize) {
        self.desired_len.store(len, Ordering::Relaxed);
        metrics::set_desired_subscriptions(len);
    }

    /// Build, track, then write a subscribe for `pair`.
    async fn issue(&self, pair: &DesiredSubscription) -> Option<CommandId> {
        let command = match self
            .client
            .dispatcher()
            .build_subscribe(&[pair.channel], &pair.ticker)
        {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(%pair, error = %e, "Desired subscription rejected");
                return None;
            }
        };

        // Tracked before the write so the ack cannot outrun it.
        self.tracker.track(command.id(), pair.clone());
        match self.client.dispatcher().dispatch(&command).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.tracker.forget(command.id());
                tracing::warn!(%pair, error = %e, "Subscribe not written; will replay");
                None
            }
        }
    }

    /// Unsubscribe a SID acked for a pair that is no longer desired.
    ///
    /// Runs under the desired-set lock so `check` cannot swap the connection
    /// between the epoch test and the write.
    async fn reconcile(&self, orphan: Orphan) {
        let _desired = self.desired.lock().await;
        let Orphan { epoch, sid } = orphan;
        if epoch != self.tracker.epoch() || !self.client.is_connected() {
            tracing::debug!(sid, epoch, "Dropping orphan SID from a closed connection");
            return;
        }
        tracing::info!(sid, "Closing subscription withdrawn while in flight");
        if let Err(e) = self.client.unsubscribe(vec![sid]).await {
            tracing::warn!(sid, error = %e, "Orphan unsubscribe not written");
        }
    }
}

async fn next_orphan(
    orphans: &mut Option<mpsc::UnboundedReceiver<Orphan>>,
) -> Option<Orphan> {
    match orphans {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::always;

    use super::*;
    use crate::infrastructure::kalshi::codec::JsonCodec;
    use crate::infrastructure::kalshi::heartbeat::HeartbeatConfig;
    use crate::infrastructure::kalshi::loopback::LoopbackConnector;
    use crate::infrastructure::kalshi::ports::MockMessageSink;

    fn pair(channel: Channel, ticker: &str) -> DesiredSubscription {
        DesiredSubscription::new(channel, ticker).unwrap()
    }

    fn decode(frame: &str) -> Envelope {
        JsonCodec::new().decode(frame).unwrap()
    }

    fn forwarding_sink(times: usize) -> Arc<dyn MessageSink> {
        let mut sink = MockMessageSink::new();
        sink.expect_route().with(always()).times(times).return_const(());
        Arc::new(sink)
    }

    fn loopback_supervisor(connector: &Arc<LoopbackConnector>) -> Arc<ReconnectSupervisor> {
        let mut transport = TransportConfig::new("wss://example.invalid/trade-api/ws/v2");
        transport.heartbeat = HeartbeatConfig::new(Duration::from_secs(3600), None);
        Arc::new(ReconnectSupervisor::with_connector(
            transport,
            None,
            Handlers::default(),
            SupervisorConfig {
                check_interval: Duration::from_secs(3600),
                reconnect: ReconnectConfig::fixed(Duration::from_millis(20), 0),
            },
            Arc::clone(connector) as Arc<dyn Connector>,
        ))
    }

    fn spawn_run(
        supervisor: &Arc<ReconnectSupervisor>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), TransportError>> {
        let supervisor = Arc::clone(supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel).await })
    }

    fn subscribed(id: CommandId, channel: &str, sid: Sid) -> String {
        format!(r#"{{"type":"subscribed","id":{id},"msg":{{"channel":"{channel}","sid":{sid}}}}}"#)
    }

    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn ack_binds_sid_to_pair() {
        let (tracker, _rx) = SubscriptionTracker::new(forwarding_sink(1));
        let abc = pair(Channel::Ticker, "ABC");
        tracker.track(1, abc.clone());
        assert!(tracker.is_tracked(&abc));

        tracker.route(&decode(
            r#"{"type":"subscribed","id":1,"msg":{"channel":"ticker","sid":7}}"#,
        ));
        assert_eq!(tracker.active_sid(&abc), Some(7));
    }

    #[test]
    fn ack_for_withdrawn_pair_becomes_orphan() {
        let (tracker, mut rx) = SubscriptionTracker::new(forwarding_sink(1));
        let abc = pair(Channel::Ticker, "ABC");
        tracker.track(1, abc.clone());

        assert_eq!(tracker.withdraw(&abc), None);
        assert!(!tracker.is_tracked(&abc));

        tracker.route(&decode(
            r#"{"type":"subscribed","id":1,"msg":{"channel":"ticker","sid":9}}"#,
        ));
        assert_eq!(tracker.active_sid(&abc), None);
        assert_eq!(rx.try_recv().unwrap(), Orphan { epoch: 0, sid: 9 });
    }

    #[test]
    fn error_clears_pending_and_unsubscribed_clears_active() {
        let (tracker, _rx) = SubscriptionTracker::new(forwarding_sink(3));
        let abc = pair(Channel::Ticker, "ABC");
        let xyz = pair(Channel::Trade, "XYZ");
        tracker.track(1, abc.clone());
        tracker.track(2, xyz.clone());

        tracker.route(&decode(
            r#"{"type":"error","id":1,"msg":{"code":6,"msg":"Already subscribed"}}"#,
        ));
        assert!(!tracker.is_tracked(&abc));

        tracker.route(&decode(
            r#"{"type":"subscribed","id":2,"msg":{"channel":"trade","sid":4}}"#,
        ));
        tracker.route(&decode(r#"{"type":"unsubscribed","sid":4}"#));
        assert!(!tracker.is_tracked(&xyz));
    }

    #[test]
    fn reset_forgets_previous_connection() {
        let (tracker, _rx) = SubscriptionTracker::new(forwarding_sink(1));
        let abc = pair(Channel::Ticker, "ABC");
        tracker.track(1, abc.clone());
        tracker.route(&decode(
            r#"{"type":"subscribed","id":1,"msg":{"channel":"ticker","sid":7}}"#,
        ));

        tracker.reset();
        assert!(!tracker.is_tracked(&abc));
        assert_eq!(tracker.active_sid(&abc), None);
        assert_eq!(tracker.epoch(), 1);
    }

    #[test]
    fn orphan_carries_the_epoch_it_was_acked_in() {
        let (tracker, mut rx) = SubscriptionTracker::new(forwarding_sink(2));
        let abc = pair(Channel::Ticker, "ABC");

        tracker.reset();
        tracker.track(1, abc.clone());
        tracker.withdraw(&abc);
        tracker.route(&decode(
            r#"{"type":"subscribed","id":1,"msg":{"channel":"ticker","sid":1}}"#,
        ));
        assert_eq!(rx.try_recv().unwrap(), Orphan { epoch: 1, sid: 1 });

        // The next connection hands out SID 1 again for a live pair.
        tracker.reset();
        tracker.track(1, abc.clone());
        tracker.route(&decode(
            r#"{"type":"subscribed","id":1,"msg":{"channel":"ticker","sid":1}}"#,
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.active_sid(&abc), Some(1));
        assert_eq!(tracker.epoch(), 2);
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_records_intent() {
        let supervisor = ReconnectSupervisor::new(
            TransportConfig::new("wss://example.invalid/trade-api/ws/v2"),
            None,
            Handlers::default(),
            SupervisorConfig::default(),
        );

        assert_eq!(supervisor.subscribe("ticker", "ABC").await.unwrap(), None);
        assert_eq!(supervisor.subscribe("ticker", "ABC").await.unwrap(), None);
        assert_eq!(supervisor.desired().await, vec![pair(Channel::Ticker, "ABC")]);
        assert_eq!(supervisor.desired_len(), 1);

        assert_eq!(supervisor.unsubscribe("ticker", "ABC").await.unwrap(), None);
        assert!(supervisor.desired().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_subscribe_is_not_recorded() {
        let supervisor = ReconnectSupervisor::new(
            TransportConfig::new("wss://example.invalid/trade-api/ws/v2"),
            None,
            Handlers::default(),
            SupervisorConfig::default(),
        );

        let err = supervisor.subscribe("fill", "ABC").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        let err = supervisor.subscribe("bogus", "ABC").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(supervisor.desired().await.is_empty());
    }

    #[tokio::test]
    async fn orphan_on_live_connection_is_unsubscribed() {
        let connector = Arc::new(LoopbackConnector::default());
        let supervisor = loopback_supervisor(&connector);
        let abc = pair(Channel::Ticker, "ABC");

        assert!(supervisor.check().await.unwrap());
        let cancel = CancellationToken::new();
        let task = spawn_run(&supervisor, &cancel);
        let live = connector.latest();

        let id = supervisor.subscribe_pair(abc.clone()).await.unwrap().unwrap();
        assert_eq!(supervisor.unsubscribe_pair(&abc).await, None);
        live.send_text(&subscribed(id, "ticker", 4));

        wait_for("orphan unsubscribe", || live.commands().len() == 2).await;
        let commands = live.commands();
        assert_eq!(commands[1]["cmd"], "unsubscribe");
        assert_eq!(commands[1]["params"]["sids"], serde_json::json!([4]));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn orphan_from_closed_connection_leaves_reused_sid_alone() {
        let connector = Arc::new(LoopbackConnector::default());
        let supervisor = loopback_supervisor(&connector);
        let abc = pair(Channel::Ticker, "ABC");
        let xyz = pair(Channel::Trade, "XYZ");

        // First connection: ABC is withdrawn before its ack names SID 1.
        assert!(supervisor.check().await.unwrap());
        let first = connector.latest();
        let id = supervisor.subscribe_pair(abc.clone()).await.unwrap().unwrap();
        assert_eq!(supervisor.unsubscribe_pair(&abc).await, None);
        first.send_text(&subscribed(id, "ticker", 1));
        first.hang_up();
        wait_for("first connection to end", || !supervisor.is_connected()).await;

        // Second connection: the replayed XYZ is also given SID 1.
        assert_eq!(supervisor.subscribe_pair(xyz.clone()).await.unwrap(), None);
        assert!(supervisor.check().await.unwrap());
        let second = connector.latest();
        let replay = second.commands();
        assert_eq!(replay.len(), 1);
        let replay_id = replay[0]["id"].as_i64().unwrap();
        second.send_text(&subscribed(replay_id, "trade", 1));
        wait_for("replayed ack", || supervisor.sid_for(&xyz) == Some(1)).await;

        let cancel = CancellationToken::new();
        let task = spawn_run(&supervisor, &cancel);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let written: Vec<_> = second
            .commands()
            .iter()
            .map(|c| c["cmd"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(written, ["subscribe"]);
        assert_eq!(supervisor.sid_for(&xyz), Some(1));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
