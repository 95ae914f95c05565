//! Subscription Domain Types
//!
//! Channels, server-confirmed subscriptions, and the caller's desired
//! subscription set.
//!
//! # Design
//!
//! Two views of "what we are subscribed to" are kept apart:
//!
//! - [`SubscriptionRegistry`]: server-confirmed subscriptions keyed by SID.
//!   SIDs are scoped to one connection and the registry is emptied whenever
//!   that connection ends. Exactly one writer (the read task) mutates it.
//! - [`DesiredSet`]: the caller's intent keyed by `(channel, ticker)`. It
//!   outlives any single connection and is what gets replayed after a
//!   reconnect.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Server-assigned subscription identifier, valid for one connection only.
pub type Sid = i64;

/// Client-assigned command identifier echoed back on acknowledgements.
pub type CommandId = i64;

// =============================================================================
// Channels
// =============================================================================

/// A topic category a subscription attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Incremental orderbook updates.
    OrderbookDelta,
    /// Market ticker updates.
    Ticker,
    /// Public trades.
    Trade,
    /// Market lifecycle events.
    Lifecycle,
    /// The caller's own fills (authenticated).
    Fill,
    /// The caller's market positions (authenticated).
    Positions,
}

impl Channel {
    /// Every channel the server recognises.
    pub const ALL: [Self; 6] = [
        Self::OrderbookDelta,
        Self::Ticker,
        Self::Trade,
        Self::Lifecycle,
        Self::Fill,
        Self::Positions,
    ];

    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderbookDelta => "orderbook_delta",
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Lifecycle => "lifecycle",
            Self::Fill => "fill",
            Self::Positions => "positions",
        }
    }

    /// Whether subscribing requires an authenticated connection.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        matches!(self, Self::Fill | Self::Positions)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidChannel(s.to_string()))
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Local request validation failures. Never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Channel name is not part of the known channel set.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Channel requires credentials but none are configured.
    #[error("channel {0} requires authentication but no credentials are configured")]
    AuthRequired(Channel),

    /// Request parameters are malformed.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// A server-confirmed subscription on the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Server-assigned identifier.
    pub sid: Sid,
    /// Channel the subscription belongs to.
    pub channel: Channel,
}

/// Authoritative map of confirmed SIDs for one connection instance.
///
/// Written only by the read task; readers get consistent snapshots.
///
/// # Example
///
/// ```rust
/// use kalshi_stream::domain::subscription::{Channel, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// registry.insert(7, Channel::Ticker);
/// assert_eq!(registry.snapshot().get(&7), Some(&Channel::Ticker));
///
/// registry.remove(7);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<Sid, Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed subscription. Replaces any entry with the same SID.
    pub fn insert(&self, sid: Sid, channel: Channel) {
        self.entries
            .write()
            .insert(sid, Subscription { sid, channel });
    }

    /// Remove a subscription, returning it if it was present.
    pub fn remove(&self, sid: Sid) -> Option<Subscription> {
        self.entries.write().remove(&sid)
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Look up a single subscription.
    #[must_use]
    pub fn get(&self, sid: Sid) -> Option<Subscription> {
        self.entries.read().get(&sid).cloned()
    }

    /// Consistent copy of the SID to channel map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Sid, Channel> {
        self.entries
            .read()
            .values()
            .map(|sub| (sub.sid, sub.channel))
            .collect()
    }

    /// Number of confirmed subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no confirmed subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// Desired Subscriptions
// =============================================================================

/// Subscription intent that survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DesiredSubscription {
    /// Channel to subscribe to.
    pub channel: Channel,
    /// Market ticker within the channel.
    pub ticker: String,
}

impl DesiredSubscription {
    /// Build a pair from a channel name and ticker.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidChannel` for an unknown channel and
    /// `ValidationError::InvalidParams` for an empty ticker.
    pub fn parse(channel: &str, ticker: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(channel.parse()?, ticker)
    }

    /// Build a pair from an already parsed channel.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidParams` for an empty ticker.
    pub fn new(channel: Channel, ticker: impl Into<String>) -> Result<Self, ValidationError> {
        let ticker = ticker.into();
        if ticker.trim().is_empty() {
            return Err(ValidationError::InvalidParams(
                "market ticker cannot be empty".to_string(),
            ));
        }
        Ok(Self { channel, ticker })
    }
}

impl fmt::Display for DesiredSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.ticker)
    }
}

/// The caller's desired subscriptions, one entry per unique pair.
///
/// Iteration order is stable so replays are deterministic.
#[derive(Debug, Default, Clone)]
pub struct DesiredSet {
    entries: BTreeSet<DesiredSubscription>,
}

impl DesiredSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair. Returns `false` if it was already desired.
    pub fn insert(&mut self, pair: DesiredSubscription) -> bool {
        self.entries.insert(pair)
    }

    /// Remove a pair. Returns `false` if it was not desired.
    pub fn remove(&mut self, pair: &DesiredSubscription) -> bool {
        self.entries.remove(pair)
    }

    /// Iterate the desired pairs in stable order.
    pub fn iter(&self) -> impl Iterator<Item = &DesiredSubscription> {
        self.entries.iter()
    }

    /// Copy of the desired pairs.
    #[must_use]
    pub fn to_vec(&self) -> Vec<DesiredSubscription> {
        self.entries.iter().cloned().collect()
    }

    /// Number of desired pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<DesiredSubscription> for DesiredSet {
    fn from_iter<I: IntoIterator<Item = DesiredSubscription>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
