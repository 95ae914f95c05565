//! Configuration Module
//!
//! Environment-driven configuration for the stream client and its binary.

mod settings;

pub use settings::{
    AuthSettings, BroadcastSettings, ConfigError, DEMO_WS_URL, Environment, PRODUCTION_WS_URL,
    PrivateKeySource, ServerSettings, StreamConfig, StreamSettings,
};
