//! Realtime socket for the RBS client.
//!
//! This crate provides:
//! - A single-connection [`ConnectionManager`] with pause/resume for
//!   backgrounding
//! - Reconnect requests with bounded exponential backoff
//! - A [`SocketTransport`] seam with a tokio-tungstenite implementation

mod error;
mod manager;
mod policy;
mod transport;

pub use error::{RealtimeError, RealtimeResult};
pub use manager::{ConnectionManager, ConnectionState, RealtimeEvent, ReconnectRequest};
pub use policy::ReconnectPolicy;
pub use transport::{SocketConnection, SocketEvent, SocketTransport, WebSocketTransport};
