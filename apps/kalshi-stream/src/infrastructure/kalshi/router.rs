//! Message Router
//!
//! Classifies decoded envelopes, keeps the subscription registry in step
//! with server acknowledgements and forwards everything to the caller's
//! handlers. Runs on the transport's read task, which makes it the only
//! writer of the registry.

use std::sync::Arc;

use crate::infrastructure::kalshi::ports::{DataHandler, EnvelopeHandler, MessageSink};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::kalshi::messages::{Envelope, EnvelopeBody};
use crate::infrastructure::metrics;

/// Routes inbound envelopes.
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    messages: Arc<dyn MessageSink>,
    data: Arc<dyn DataHandler>,
}

impl MessageRouter {
    /// Create a router feeding `registry`, `messages` and `data`.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        messages: Arc<dyn MessageSink>,
        data: Arc<dyn DataHandler>,
    ) -> Self {
        Self {
            registry,
            messages,
            data,
        }
    }

    /// The registry this router maintains.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

impl EnvelopeHandler for MessageRouter {
    fn handle(&self, envelope: Envelope) {
        match &envelope.body {
            EnvelopeBody::Subscribed(msg) => {
                self.registry.insert(msg.sid, msg.channel);
                metrics::set_active_subscriptions(self.registry.len());
                tracing::info!(
                    id = envelope.id,
                    sid = msg.sid,
                    channel = %msg.channel,
                    "Subscription confirmed"
                );
                self.messages.route(&envelope);
            }
            EnvelopeBody::Unsubscribed => {
                if let Some(sid) = envelope.sid {
                    self.registry.remove(sid);
                    metrics::set_active_subscriptions(self.registry.len());
                    tracing::info!(id = envelope.id, sid, "Subscription closed");
                }
                self.messages.route(&envelope);
            }
            EnvelopeBody::Ok(_) => self.messages.route(&envelope),
            EnvelopeBody::Error(err) => {
                metrics::record_server_error(err.code);
                tracing::warn!(
                    id = envelope.id,
                    code = err.code,
                    msg = %err.msg,
                    "Server rejected command"
                );
                self.messages.route(&envelope);
            }
            EnvelopeBody::Data { .. } => self.data.on_data(&envelope),
        }
    }

    fn session_ended(&self) {
        let dropped = self.registry.clear();
        metrics::set_active_subscriptions(0);
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared subscriptions of ended session");
        }
    }
}
