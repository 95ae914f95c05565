//! Broadcast Channel Adapters
//!
//! Fans stream activity out to any number of in-process consumers using
//! tokio broadcast channels.
//!
//! # Architecture
//!
//! [`StreamEvents`] implements every caller port (connection observer,
//! message sink, data handler) and republishes on two channels:
//! - **events**: lifecycle transitions plus acknowledgements and server errors
//! - **data**: streaming data envelopes
//!
//! Slow receivers lag and lose the oldest messages rather than blocking the
//! read task.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::infrastructure::kalshi::ports::{ConnectionObserver, DataHandler, MessageSink};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::kalshi::messages::Envelope;
use crate::infrastructure::kalshi::transport::TransportError;

// =============================================================================
// Broadcast Messages
// =============================================================================

/// Lifecycle or control event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection was established.
    Connected,
    /// The connection ended; `None` for a clean close.
    Disconnected {
        /// Error description for an abnormal end.
        reason: Option<String>,
    },
    /// A transport error was reported.
    Errored {
        /// Error description.
        error: String,
    },
    /// A `subscribed`, `unsubscribed`, `ok` or `error` envelope.
    Message(Envelope),
}

/// Streaming data broadcast message.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBroadcast {
    /// The data envelope, payload uninterpreted.
    pub envelope: Envelope,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the event channel.
    pub events_capacity: usize,
    /// Capacity for the data channel.
    pub data_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            events_capacity: 1_000,
            data_capacity: 10_000,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            events_capacity: settings.events_capacity,
            data_capacity: settings.data_capacity,
        }
    }
}

/// Hub republishing stream activity.
#[derive(Debug)]
pub struct StreamEvents {
    events_tx: broadcast::Sender<StreamEvent>,
    data_tx: broadcast::Sender<DataBroadcast>,
}

/// Shared reference to the hub.
pub type SharedStreamEvents = Arc<StreamEvents>;

impl StreamEvents {
    /// Create a hub with the given capacities.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.events_capacity.max(1));
        let (data_tx, _) = broadcast::channel(config.data_capacity.max(1));
        Self { events_tx, data_tx }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Publish an event. Returns the number of receivers reached, or `None`
    /// when nobody is listening.
    pub fn send_event(&self, event: StreamEvent) -> Option<usize> {
        self.events_tx.send(event).ok()
    }

    /// Subscribe to lifecycle and control events.
    #[must_use]
    pub fn events_rx(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    /// Publish a data envelope.
    pub fn send_data(&self, envelope: Envelope) -> Option<usize> {
        self.data_tx.send(DataBroadcast { envelope }).ok()
    }

    /// Subscribe to data envelopes.
    #[must_use]
    pub fn data_rx(&self) -> broadcast::Receiver<DataBroadcast> {
        self.data_tx.subscribe()
    }

    /// Total receivers across both channels.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.events_tx.receiver_count() + self.data_tx.receiver_count()
    }
}

impl ConnectionObserver for StreamEvents {
    fn connected(&self) {
        self.send_event(StreamEvent::Connected);
    }

    fn disconnected(&self, reason: Option<&TransportError>) {
        self.send_event(StreamEvent::Disconnected {
            reason: reason.map(ToString::to_string),
        });
    }

    fn errored(&self, error: &TransportError) {
        self.send_event(StreamEvent::Errored {
            error: error.to_string(),
        });
    }
}

impl MessageSink for StreamEvents {
    fn route(&self, envelope: &Envelope) {
        self.send_event(StreamEvent::Message(envelope.clone()));
    }
}

impl DataHandler for StreamEvents {
    fn on_data(&self, envelope: &Envelope) {
        self.send_data(envelope.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kalshi::codec::JsonCodec;

    fn data_envelope() -> Envelope {
        JsonCodec::new()
            .decode(r#"{"type":"ticker","sid":7,"seq":1,"msg":{"price":42}}"#)
            .unwrap()
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let hub = StreamEvents::with_defaults();
        assert_eq!(hub.receiver_count(), 0);

        let events = hub.events_rx();
        let data = hub.data_rx();
        assert_eq!(hub.receiver_count(), 2);

        drop(events);
        drop(data);
        assert_eq!(hub.receiver_count(), 0);
    }

    #[test]
    fn send_with_no_receivers_returns_none() {
        let hub = StreamEvents::with_defaults();
        assert!(hub.send_event(StreamEvent::Connected).is_none());
        assert!(hub.send_data(data_envelope()).is_none());
    }

    #[tokio::test]
    async fn observer_callbacks_become_events() {
        let hub = StreamEvents::with_defaults();
        let mut rx = hub.events_rx();

        hub.connected();
        hub.disconnected(Some(&TransportError::ConnectionClosed("reset".to_string())));
        hub.disconnected(None);

        assert_eq!(rx.recv().await.unwrap(), StreamEvent::Connected);
        assert_eq!(
            rx.recv().await.unwrap(),
            StreamEvent::Disconnected {
                reason: Some("connection closed: reset".to_string())
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            StreamEvent::Disconnected { reason: None }
        );
    }

    #[tokio::test]
    async fn every_data_receiver_gets_the_envelope() {
        let hub = StreamEvents::with_defaults();
        let mut first = hub.data_rx();
        let mut second = hub.data_rx();

        hub.on_data(&data_envelope());

        assert_eq!(first.recv().await.unwrap().envelope, data_envelope());
        assert_eq!(second.recv().await.unwrap().envelope, data_envelope());
    }

    #[test]
    fn custom_config() {
        let hub = StreamEvents::new(BroadcastConfig {
            events_capacity: 0,
            data_capacity: 5,
        });
        let _rx = hub.events_rx();
        assert!(hub.send_event(StreamEvent::Connected).is_some());
    }
}
