//! WebSocket Stream Relay
//!
//! Subscribes to the trade stream topic and forwards every payload,
//! unmodified, to all connected clients.

pub mod relay;

pub use relay::RelayHub;
