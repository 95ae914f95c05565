//! Domain Layer - Core subscription types.
//!
//! This layer contains the channel vocabulary and the two subscription
//! views (server-confirmed registry, caller-desired set). It has no
//! knowledge of the wire protocol or the transport.

/// Channels, subscription registry, and desired subscription set.
pub mod subscription;
