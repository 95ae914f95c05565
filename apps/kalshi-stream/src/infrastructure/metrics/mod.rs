//! Prometheus Metrics Module
//!
//! Exposes stream client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by envelope type, protocol errors, processing latency
//! - **Commands**: outbound commands by verb, server-reported errors
//! - **Connection**: connection state and reconnect outcomes
//! - **Subscriptions**: server-confirmed and desired subscription counts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording is
//! a no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kalshi_stream_frames_received_total",
        "Inbound frames decoded, by envelope type"
    );
    describe_counter!(
        "kalshi_stream_protocol_errors_total",
        "Inbound frames that failed to decode"
    );
    describe_counter!(
        "kalshi_stream_commands_sent_total",
        "Commands written to the connection, by verb"
    );
    describe_counter!(
        "kalshi_stream_server_errors_total",
        "Error envelopes received from the server"
    );
    describe_counter!(
        "kalshi_stream_reconnects_total",
        "Reconnect attempts by outcome"
    );

    describe_gauge!(
        "kalshi_stream_connected",
        "Whether the stream connection is up (1) or down (0)"
    );
    describe_gauge!(
        "kalshi_stream_active_subscriptions",
        "Server-confirmed subscriptions on the current connection"
    );
    describe_gauge!(
        "kalshi_stream_desired_subscriptions",
        "Subscriptions the supervisor keeps alive across reconnects"
    );

    describe_histogram!(
        "kalshi_stream_frame_processing_seconds",
        "Time to decode and route one inbound frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The connection was re-established.
    Success,
    /// The attempt failed and will be retried.
    Failure,
    /// The attempt cap was reached.
    Exhausted,
}

impl ReconnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Record one decoded inbound frame.
pub fn record_frame_received(kind: &str) {
    counter!(
        "kalshi_stream_frames_received_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an inbound frame that failed to decode.
pub fn record_protocol_error() {
    counter!("kalshi_stream_protocol_errors_total").increment(1);
}

/// Record a command written to the connection.
pub fn record_command_sent(cmd: &'static str) {
    counter!("kalshi_stream_commands_sent_total", "cmd" => cmd).increment(1);
}

/// Record an error envelope from the server.
pub fn record_server_error(code: i64) {
    counter!(
        "kalshi_stream_server_errors_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect(outcome: ReconnectOutcome) {
    counter!(
        "kalshi_stream_reconnects_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connected(connected: bool) {
    gauge!("kalshi_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the server-confirmed subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("kalshi_stream_active_subscriptions").set(count as f64);
}

/// Update the desired subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_desired_subscriptions(count: usize) {
    gauge!("kalshi_stream_desired_subscriptions").set(count as f64);
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("kalshi_stream_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
