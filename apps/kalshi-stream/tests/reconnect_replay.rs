//! Reconnect Supervisor Integration Tests
//!
//! Verifies that the desired subscription set survives server-side drops:
//! every pair is re-subscribed exactly once per reconnect, and the attempt
//! cap ends the loop with a terminal error.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{FIRST_SID, MockServer, WAIT, eventually};
use kalshi_stream::infrastructure::kalshi::ReconnectConfig;
use kalshi_stream::{
    DesiredSubscription, Handlers, ReconnectSupervisor, Sid, StreamEvent, StreamEvents,
    SupervisorConfig, TransportConfig, TransportError,
};

fn fast_config(max_attempts: u32) -> SupervisorConfig {
    SupervisorConfig {
        check_interval: Duration::from_millis(50),
        reconnect: ReconnectConfig::fixed(Duration::from_millis(20), max_attempts),
    }
}

fn supervisor(url: &str, config: SupervisorConfig) -> (Arc<ReconnectSupervisor>, Arc<StreamEvents>) {
    let events = Arc::new(StreamEvents::with_defaults());
    let supervisor = Arc::new(ReconnectSupervisor::new(
        TransportConfig::new(url),
        None,
        Handlers::shared(Arc::clone(&events)),
        config,
    ));
    (supervisor, events)
}

fn spawn_run(
    supervisor: &Arc<ReconnectSupervisor>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<Result<(), TransportError>> {
    let supervisor = Arc::clone(supervisor);
    let cancel = cancel.clone();
    tokio::spawn(async move { supervisor.run(cancel).await })
}

fn subscribe_pair(command: &Value) -> (String, String) {
    assert_eq!(command["cmd"], "subscribe");
    (
        command["params"]["channels"][0].as_str().unwrap().to_string(),
        command["params"]["market_ticker"].as_str().unwrap().to_string(),
    )
}

fn pair(channel: &str, ticker: &str) -> DesiredSubscription {
    DesiredSubscription::parse(channel, ticker).unwrap()
}

fn sids(supervisor: &ReconnectSupervisor) -> BTreeSet<Sid> {
    [pair("ticker", "KXA"), pair("trade", "KXB")]
        .iter()
        .filter_map(|p| supervisor.sid_for(p))
        .collect()
}

#[tokio::test]
async fn desired_set_is_replayed_once_after_server_drop() {
    let mut server = MockServer::start().await;
    let (supervisor, _events) = supervisor(&server.url, fast_config(0));

    // Recorded while disconnected; nothing is written yet.
    assert_eq!(supervisor.subscribe("ticker", "KXA").await.unwrap(), None);
    assert_eq!(supervisor.subscribe("trade", "KXB").await.unwrap(), None);
    assert_eq!(supervisor.desired_len(), 2);

    let cancel = CancellationToken::new();
    let task = spawn_run(&supervisor, &cancel);

    let expected = BTreeSet::from([
        ("ticker".to_string(), "KXA".to_string()),
        ("trade".to_string(), "KXB".to_string()),
    ]);
    let first: BTreeSet<_> = [server.next_command().await, server.next_command().await]
        .iter()
        .map(subscribe_pair)
        .collect();
    assert_eq!(first, expected);

    eventually("first acks", || {
        supervisor.sid_for(&pair("ticker", "KXA")).is_some()
            && supervisor.sid_for(&pair("trade", "KXB")).is_some()
    })
    .await;
    let first_sids = sids(&supervisor);
    assert_eq!(first_sids, BTreeSet::from([FIRST_SID, FIRST_SID + 1]));

    server.drop_connections();

    let second: BTreeSet<_> = [server.next_command().await, server.next_command().await]
        .iter()
        .map(subscribe_pair)
        .collect();
    assert_eq!(second, expected);
    server.assert_quiet(Duration::from_millis(300)).await;

    eventually("replayed acks", || {
        supervisor.active_subscriptions().len() == 2
            && supervisor.sid_for(&pair("ticker", "KXA")).is_some()
            && supervisor.sid_for(&pair("trade", "KXB")).is_some()
    })
    .await;
    // The new connection hands out the same SIDs again.
    assert_eq!(sids(&supervisor), first_sids);

    // Unsubscribing uses the SID from the current connection.
    let kxb = supervisor.sid_for(&pair("trade", "KXB")).unwrap();
    assert!(supervisor.unsubscribe("trade", "KXB").await.unwrap().is_some());
    let command = server.next_command().await;
    assert_eq!(command["cmd"], "unsubscribe");
    assert_eq!(command["params"]["sids"], serde_json::json!([kxb]));
    eventually("registry to shrink", || {
        supervisor.active_subscriptions().len() == 1
    })
    .await;
    assert!(supervisor.sid_for(&pair("ticker", "KXA")).is_some());

    cancel.cancel();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(!supervisor.is_connected());
}

#[tokio::test]
async fn unsubscribe_sends_the_acknowledged_sid() {
    let mut server = MockServer::start().await;
    let (supervisor, _events) = supervisor(&server.url, fast_config(0));
    let cancel = CancellationToken::new();
    let task = spawn_run(&supervisor, &cancel);

    eventually("connection", || supervisor.is_connected()).await;
    let id = supervisor.subscribe("ticker", "KXA").await.unwrap();
    assert!(id.is_some());
    server.next_command().await;

    eventually("ack", || supervisor.sid_for(&pair("ticker", "KXA")).is_some()).await;
    let sid = supervisor.sid_for(&pair("ticker", "KXA")).unwrap();

    // Already active: recorded, not re-sent.
    assert_eq!(supervisor.subscribe("ticker", "KXA").await.unwrap(), None);

    let id = supervisor.unsubscribe("ticker", "KXA").await.unwrap();
    assert!(id.is_some());

    let command = server.next_command().await;
    assert_eq!(command["cmd"], "unsubscribe");
    assert_eq!(command["params"]["sids"], serde_json::json!([sid]));
    assert!(supervisor.desired().await.is_empty());
    eventually("registry to empty", || {
        supervisor.active_subscriptions().is_empty()
    })
    .await;

    cancel.cancel();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unsubscribe_while_disconnected_only_updates_intent() {
    let (supervisor, _events) = supervisor("ws://127.0.0.1:9/trade-api/ws/v2", fast_config(0));

    supervisor.subscribe("ticker", "KXA").await.unwrap();
    let id = supervisor.unsubscribe("ticker", "KXA").await.unwrap();

    assert_eq!(id, None);
    assert!(supervisor.desired().await.is_empty());
    assert_eq!(supervisor.desired_len(), 0);
}

#[tokio::test]
async fn invalid_intent_is_not_recorded() {
    let (supervisor, _events) = supervisor("ws://127.0.0.1:9/trade-api/ws/v2", fast_config(0));

    assert!(supervisor.subscribe("bogus", "KXA").await.is_err());
    assert!(supervisor.subscribe("fill", "KXA").await.is_err());
    assert!(supervisor.subscribe("ticker", "").await.is_err());
    assert_eq!(supervisor.desired_len(), 0);
}

#[tokio::test]
async fn gives_up_after_attempt_cap() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/trade-api/ws/v2", listener.local_addr().unwrap());
    drop(listener);

    let (supervisor, events) = supervisor(&url, fast_config(2));
    let mut rx = events.events_rx();

    let result = timeout(WAIT, supervisor.run(CancellationToken::new()))
        .await
        .expect("supervisor should stop on its own");

    assert!(matches!(result, Err(TransportError::ReconnectExhausted(2))));

    let mut errors = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let StreamEvent::Errored { error } = event {
            errors.push(error);
        }
    }
    assert!(errors.len() >= 2);
    assert!(
        errors
            .last()
            .unwrap()
            .starts_with("reconnect attempts exhausted")
    );
}
