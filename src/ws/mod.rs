//! Client WebSocket protocol, connection registry and session handling

pub mod handler;
pub mod protocol;
pub mod registry;
