//! # Courier Server
//!
//! HTTP and WebSocket front end for the Courier write buffer.
//!
//! - `POST /messages` queues a message with the buffered writer.
//! - `GET /messages` lists persisted messages.
//! - `GET /stats` and `GET /health` report writer and broadcaster state.
//! - A separate listener on `ws_port` upgrades `GET /` to a WebSocket that
//!   receives every persisted message as a JSON text frame.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
