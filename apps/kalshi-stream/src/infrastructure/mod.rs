//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the Kalshi protocol client, its port interfaces, and
//! the adapters that plug into them.

/// Kalshi WebSocket client adapters.
pub mod kalshi;

/// Broadcast channel adapters for event distribution.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
