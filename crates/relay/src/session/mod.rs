//! Session management module.
//!
//! This module provides PTY spawning and session lifecycle management.
//! Sessions are created by an endpoint, written to, resized, and terminated
//! on request, on process exit, or when the endpoint disconnects.

pub mod backend;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pty;

pub use backend::{resolve_shell, NativePtySystem, PtySystem, SpawnRequest};
pub use manager::{
    CreatedSession, Endpoint, EndpointId, Outbox, SessionInfo, SessionManager, SessionSettings,
};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockProcess, MockPtySystem};
pub use pty::{
    PtyDimensions, PtyEvent, PtyEvents, PtySession, SessionError, SessionId, SessionState,
};
