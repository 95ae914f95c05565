//! Loopback Kalshi stream server for integration tests.
//!
//! Accepts WebSocket upgrades on `127.0.0.1`, records handshake headers and
//! every command it receives, and acknowledges commands the way the real
//! server does. Tests can push raw frames or drop live connections.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;

/// How long tests wait for anything to happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// First SID the server hands out on every connection.
pub const FIRST_SID: i64 = 7;

/// Instruction for every live server connection.
#[derive(Debug, Clone)]
pub enum Action {
    /// Write a raw text frame.
    Send(String),
    /// Drop the socket without a close handshake.
    Drop,
}

/// Handle to a running loopback server.
pub struct MockServer {
    /// `ws://` URL ending in the stream path.
    pub url: String,
    /// Decoded commands in arrival order.
    pub commands: mpsc::UnboundedReceiver<Value>,
    /// Upgrade request headers, one entry per connection.
    pub handshakes: mpsc::UnboundedReceiver<HeaderMap>,
    actions: broadcast::Sender<Action>,
}

impl MockServer {
    /// Start a server on an ephemeral port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "ws://{}/trade-api/ws/v2",
            listener.local_addr().unwrap()
        );
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (handshakes_tx, handshakes) = mpsc::unbounded_channel();
        let (actions, _) = broadcast::channel(64);

        let accept_actions = actions.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(serve(
                    tcp,
                    commands_tx.clone(),
                    handshakes_tx.clone(),
                    accept_actions.subscribe(),
                ));
            }
        });

        Self {
            url,
            commands,
            handshakes,
            actions,
        }
    }

    /// Push a raw text frame to every live connection.
    pub fn send(&self, text: impl Into<String>) {
        self.actions.send(Action::Send(text.into())).unwrap();
    }

    /// Drop every live connection.
    pub fn drop_connections(&self) {
        self.actions.send(Action::Drop).unwrap();
    }

    /// Next command, failing the test if none arrives in time.
    pub async fn next_command(&mut self) -> Value {
        timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("server stopped")
    }

    /// Assert no command arrives within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(command)) = timeout(window, self.commands.recv()).await {
            panic!("unexpected command: {command}");
        }
    }

    /// Headers of the next upgrade request.
    pub async fn next_handshake(&mut self) -> HeaderMap {
        timeout(WAIT, self.handshakes.recv())
            .await
            .expect("timed out waiting for a handshake")
            .expect("server stopped")
    }
}

async fn serve(
    tcp: TcpStream,
    commands: mpsc::UnboundedSender<Value>,
    handshakes: mpsc::UnboundedSender<HeaderMap>,
    mut actions: broadcast::Receiver<Action>,
) {
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = handshakes.send(request.headers().clone());
        Ok(response)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    // SIDs are scoped to the connection.
    let mut next_sid = FIRST_SID;

    loop {
        tokio::select! {
            frame = read.next() => {
                let Some(Ok(frame)) = frame else { return };
                let Message::Text(text) = frame else { continue };
                let command: Value = serde_json::from_str(text.as_str()).unwrap();
                for reply in acknowledge(&command, &mut next_sid) {
                    if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
                let _ = commands.send(command);
            }
            action = actions.recv() => match action {
                Ok(Action::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Action::Drop) | Err(_) => return,
            },
        }
    }
}

fn acknowledge(command: &Value, next_sid: &mut i64) -> Vec<Value> {
    let id = command["id"].clone();
    match command["cmd"].as_str() {
        Some("subscribe") => command["params"]["channels"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|channel| {
                let sid = *next_sid;
                *next_sid += 1;
                json!({"id": id, "type": "subscribed", "msg": {"channel": channel, "sid": sid}})
            })
            .collect(),
        Some("unsubscribe") => command["params"]["sids"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|sid| json!({"id": id, "sid": sid, "seq": 1, "type": "unsubscribed"}))
            .collect(),
        Some("list_subscriptions" | "update_subscription") => {
            vec![json!({"id": id, "type": "ok", "msg": []})]
        }
        _ => vec![json!({"id": id, "type": "error", "msg": {"code": 8, "msg": "Unknown command"}})],
    }
}

/// A fresh 1024-bit RSA key as PKCS#8 PEM.
pub fn generate_pem() -> (RsaPrivateKey, String) {
    let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    (key, pem)
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
