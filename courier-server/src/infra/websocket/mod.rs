//! WebSocket transport for the broadcaster.

pub mod connection;
pub mod handler;

pub use connection::{Outbound, WsConnection};
pub use handler::subscribe_handler;
