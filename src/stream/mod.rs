//! Persistent WebSocket streams: connections with topic fan-out and the
//! address-keyed registry that shares them.

mod connection;
mod registry;
mod state;

pub use connection::{OutboundMessage, StreamConnection};
pub use registry::ConnectionRegistry;
pub use state::{ConnectionState, StreamStats};
