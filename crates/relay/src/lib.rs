//! # PtyRelay Library
//!
//! This crate provides the server side of PtyRelay: real shells on
//! pseudo-terminals, relayed to remote endpoints over WebSocket.
//!
//! ## Overview
//!
//! - **PTY Sessions**: Spawn a shell on a pseudo-terminal, write input,
//!   resize, terminate, and stream its output and exit
//! - **Session Manager**: Registry of live sessions, each owned by the
//!   endpoint that started it, with one relay task per session
//! - **Message Router**: Translates `start`/`input`/`resize`/`close` into
//!   session operations and failures into `error` messages
//! - **Relay Server**: WebSocket accept loop and per-connection pumps
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Relay Server                          │
//! │    (one reader loop + one writer task per WebSocket)         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       Message Router                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      Session Manager                         │
//! │   registry: id → {owner, session}     relay task / session   │
//! ├──────────────────────────────────────────────────────────────┤
//! │   PtySession (reader / writer / waiter threads)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │   PtySystem: NativePtySystem (portable-pty) | MockPtySystem  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use relay::{Config, NativePtySystem, RelayServer, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let manager = Arc::new(SessionManager::new(
//!         Arc::new(NativePtySystem::new()),
//!         config.session_settings(),
//!     ));
//!
//!     let server = RelayServer::bind(config.listen_addr()?, manager, 256).await?;
//!     let shutdown = server.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY backends, sessions and the session manager
//! - [`router`]: Message routing to the session manager
//! - [`network`]: WebSocket server

pub mod config;
pub mod network;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use network::RelayServer;
pub use router::{MessageRouter, RouterError, RouterResult};
pub use session::{
    Endpoint, EndpointId, NativePtySystem, PtyDimensions, PtyEvent, PtySession, PtySystem,
    SessionError, SessionId, SessionInfo, SessionManager, SessionSettings, SessionState,
};

#[cfg(any(test, feature = "test-util"))]
pub use session::MockPtySystem;
