//! Network module for endpoint connections.
//!
//! Endpoints reach the relay over WebSocket: one connection per endpoint,
//! one JSON message per text frame.

pub mod websocket;

pub use websocket::{handle_connection, RelayServer};
