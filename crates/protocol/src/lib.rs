//! # PtyRelay Protocol Library
//!
//! Wire definitions shared by the relay and its endpoints.
//!
//! ## Overview
//!
//! An endpoint talks to the relay over one persistent, message-framed channel
//! (a WebSocket in the reference server). Each frame is a JSON object tagged
//! by `type`:
//!
//! ```text
//!  endpoint                              relay
//!     │  {"type":"start","cols":80,"rows":24}  │
//!     │ ─────────────────────────────────────▶ │  spawn shell on a pty
//!     │  {"type":"ready","id":"…"}             │
//!     │ ◀───────────────────────────────────── │
//!     │  {"type":"input","id":"…","data":"ls\r"}
//!     │ ─────────────────────────────────────▶ │
//!     │  {"type":"output","id":"…","data":"…"} │
//!     │ ◀───────────────────────────────────── │
//!     │  {"type":"exit","id":"…","code":0}     │
//!     │ ◀───────────────────────────────────── │
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let request = ClientMessage::from_json(r#"{"type":"start","cols":80,"rows":24}"#).unwrap();
//! assert!(matches!(request, ClientMessage::Start { cols: Some(80), .. }));
//!
//! let reply = ServerMessage::Ready { id: "s1".into(), pid: None };
//! assert_eq!(reply.to_json().unwrap(), r#"{"type":"ready","id":"s1"}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Endpoint and relay message definitions
//! - [`encoding`]: `data` payload encodings and the streaming output encoder
//! - [`error`]: Error types

pub mod encoding;
pub mod error;
pub mod messages;

pub use encoding::{DataEncoding, OutputEncoder};
pub use error::{ProtocolError, Result};
pub use messages::{ClientMessage, ServerMessage};
