//! Kalshi WebSocket Message Types
//!
//! Wire format types for the commands we send and the envelopes we receive.
//!
//! # Outgoing Commands
//!
//! ```json
//! {"id": 1, "cmd": "subscribe", "params": {"channels": ["ticker"], "market_ticker": "ABC"}}
//! {"id": 2, "cmd": "unsubscribe", "params": {"sids": [7]}}
//! {"id": 3, "cmd": "list_subscriptions"}
//! {"id": 4, "cmd": "update_subscription", "params": {"sid": 7, "market_tickers": ["XYZ"], "action": "add_markets"}}
//! ```
//!
//! # Incoming Envelopes
//!
//! Every inbound frame carries a `type` tag plus optional `id` (echo of a
//! command id), `sid`, `seq`, and a type-specific `msg`:
//!
//! - `subscribed`: `{"channel": "ticker", "sid": 7}`
//! - `unsubscribed`: SID on the envelope
//! - `ok`: acknowledgement for list/update commands
//! - `error`: `{"code": 8, "msg": "..."}`
//! - anything else: streaming data, payload left uninterpreted

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::subscription::{Channel, CommandId, Sid};

// =============================================================================
// Commands
// =============================================================================

/// Command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Open a subscription.
    Subscribe,
    /// Close subscriptions by SID.
    Unsubscribe,
    /// Ask the server for its view of our subscriptions.
    ListSubscriptions,
    /// Add or remove markets on an existing subscription.
    UpdateSubscription,
}

impl CommandKind {
    /// Wire name of the verb.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::ListSubscriptions => "list_subscriptions",
            Self::UpdateSubscription => "update_subscription",
        }
    }
}

/// Parameters of a `subscribe` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// Channels to open.
    pub channels: Vec<Channel>,
    /// Market the channels are scoped to.
    pub market_ticker: String,
}

/// Parameters of an `unsubscribe` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    /// Subscriptions to close.
    pub sids: Vec<Sid>,
}

/// Market-set edit applied by `update_subscription`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// Add markets to the subscription.
    AddMarkets,
    /// Remove markets from the subscription.
    DeleteMarkets,
}

/// Parameters of an `update_subscription` command.
///
/// Targets either one `sid` or a `sids` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscriptionParams {
    /// Target subscriptions (list form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sids: Option<Vec<Sid>>,
    /// Target subscription (single form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Sid>,
    /// Markets to add or remove.
    pub market_tickers: Vec<String>,
    /// Whether to add or remove.
    pub action: UpdateAction,
}

impl UpdateSubscriptionParams {
    /// Add markets to one subscription.
    #[must_use]
    pub fn add_markets(sid: Sid, market_tickers: Vec<String>) -> Self {
        Self {
            sids: None,
            sid: Some(sid),
            market_tickers,
            action: UpdateAction::AddMarkets,
        }
    }

    /// Remove markets from one subscription.
    #[must_use]
    pub fn delete_markets(sid: Sid, market_tickers: Vec<String>) -> Self {
        Self {
            sids: None,
            sid: Some(sid),
            market_tickers,
            action: UpdateAction::DeleteMarkets,
        }
    }

    /// Apply the same edit to several subscriptions.
    #[must_use]
    pub const fn for_sids(sids: Vec<Sid>, market_tickers: Vec<String>, action: UpdateAction) -> Self {
        Self {
            sids: Some(sids),
            sid: None,
            market_tickers,
            action,
        }
    }

    /// Whether the parameters name at least one target.
    #[must_use]
    pub fn has_target(&self) -> bool {
        self.sid.is_some() || self.sids.as_ref().is_some_and(|sids| !sids.is_empty())
    }
}

/// Parameter payload of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandParams {
    /// `subscribe` parameters.
    Subscribe(SubscribeParams),
    /// `unsubscribe` parameters.
    Unsubscribe(UnsubscribeParams),
    /// `update_subscription` parameters.
    Update(UpdateSubscriptionParams),
}

/// An outgoing command envelope.
///
/// Built only through the typed constructors so the verb and parameters
/// always agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    id: CommandId,
    cmd: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<CommandParams>,
}

impl Command {
    /// `subscribe` command.
    #[must_use]
    pub const fn subscribe(id: CommandId, params: SubscribeParams) -> Self {
        Self {
            id,
            cmd: CommandKind::Subscribe,
            params: Some(CommandParams::Subscribe(params)),
        }
    }

    /// `unsubscribe` command.
    #[must_use]
    pub const fn unsubscribe(id: CommandId, params: UnsubscribeParams) -> Self {
        Self {
            id,
            cmd: CommandKind::Unsubscribe,
            params: Some(CommandParams::Unsubscribe(params)),
        }
    }

    /// `list_subscriptions` command.
    #[must_use]
    pub const fn list_subscriptions(id: CommandId) -> Self {
        Self {
            id,
            cmd: CommandKind::ListSubscriptions,
            params: None,
        }
    }

    /// `update_subscription` command.
    #[must_use]
    pub const fn update_subscription(id: CommandId, params: UpdateSubscriptionParams) -> Self {
        Self {
            id,
            cmd: CommandKind::UpdateSubscription,
            params: Some(CommandParams::Update(params)),
        }
    }

    /// Local command id.
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Command verb.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        self.cmd
    }

    /// Command parameters, if the verb takes any.
    #[must_use]
    pub const fn params(&self) -> Option<&CommandParams> {
        self.params.as_ref()
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// `msg` payload of a `subscribed` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedMessage {
    /// Channel that was opened.
    pub channel: Channel,
    /// Server-assigned subscription id.
    pub sid: Sid,
}

/// `msg` payload of an `error` envelope.
///
/// # Wire Format (JSON)
/// ```json
/// {"code": 6, "msg": "Already subscribed"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Server error code.
    pub code: i64,
    /// Human-readable description.
    pub msg: String,
}

/// Type-specific part of an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    /// A subscription was opened.
    Subscribed(SubscribedMessage),
    /// The subscription named by the envelope SID was closed.
    Unsubscribed,
    /// Generic acknowledgement; payload forwarded untouched.
    Ok(Option<Value>),
    /// Server-reported error for a command.
    Error(ErrorMessage),
    /// Streaming data.
    Data {
        /// The envelope's `type` tag (`data`, or a channel-specific name).
        kind: String,
        /// Uninterpreted payload.
        msg: Value,
    },
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Echo of the command id this answers, if any.
    pub id: Option<CommandId>,
    /// Subscription the message belongs to, if any.
    pub sid: Option<Sid>,
    /// Per-subscription sequence number, if any.
    pub seq: Option<i64>,
    /// Type-specific payload.
    pub body: EnvelopeBody,
}

impl Envelope {
    /// The `type` tag this envelope was decoded from.
    #[must_use]
    pub fn kind(&self) -> &str {
        match &self.body {
            EnvelopeBody::Subscribed(_) => "subscribed",
            EnvelopeBody::Unsubscribed => "unsubscribed",
            EnvelopeBody::Ok(_) => "ok",
            EnvelopeBody::Error(_) => "error",
            EnvelopeBody::Data { kind, .. } => kind,
        }
    }

    /// Whether this is a streaming data envelope.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self.body, EnvelopeBody::Data { .. })
    }
}
