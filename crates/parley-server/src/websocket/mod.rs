//! Push channel: per-connection state, heartbeat and the upgrade gateway.

pub mod connection;
pub mod gateway;
pub mod heartbeat;
