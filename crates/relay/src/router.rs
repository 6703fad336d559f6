//! Message router for dispatching endpoint frames to the session manager.
//!
//! This module provides the `MessageRouter` struct that parses incoming
//! frames, turns them into session manager operations, and reports failures
//! back to the endpoint as `error` messages. A failed request never closes
//! the connection.

use std::sync::Arc;

use protocol::{ClientMessage, DataEncoding, OutputEncoder, ProtocolError, ServerMessage};
use tracing::{debug, info, trace, warn};

use crate::session::{Endpoint, PtyDimensions, SessionError, SessionManager};

/// Result type for router operations.
pub type RouterResult = Result<Option<ServerMessage>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The frame was not a valid message.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// A well-formed message carried unusable values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Session-related error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl RouterError {
    /// Converts the error into the `error` message sent to the endpoint.
    pub fn to_error_message(&self) -> ServerMessage {
        let message = match self {
            RouterError::Session(e) if e.is_spawn_failure() => {
                format!("failed to start terminal: {e}")
            }
            RouterError::Session(e) => e.to_string(),
            other => other.to_string(),
        };
        ServerMessage::error(message)
    }
}

/// Dispatches endpoint messages to the session manager.
#[derive(Clone)]
pub struct MessageRouter {
    /// Session manager for PTY operations.
    manager: Arc<SessionManager>,
}

impl MessageRouter {
    /// Create a new message router over `manager`.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Returns the session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Handles one raw frame from `endpoint`, pushing any reply or error to
    /// its outbox.
    pub async fn dispatch(&self, endpoint: &Endpoint, raw: &str) {
        let result = match ClientMessage::from_json(raw) {
            Ok(message) => self.route(endpoint, message).await,
            Err(e) => Err(e.into()),
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                warn!(endpoint = endpoint.id(), error = %e, "Request failed");
                e.to_error_message()
            }
        };

        if endpoint.outbox().send(reply).await.is_err() {
            debug!(endpoint = endpoint.id(), "Endpoint gone, dropping reply");
        }
    }

    /// Route a parsed message to the appropriate handler.
    pub async fn route(&self, endpoint: &Endpoint, message: ClientMessage) -> RouterResult {
        trace!(endpoint = endpoint.id(), ?message, "Routing message");

        match message {
            ClientMessage::Start {
                cols,
                rows,
                encoding,
            } => self.handle_start(endpoint, cols, rows, encoding).await,
            ClientMessage::Input { id, data, encoding } => {
                self.handle_input(endpoint, &id, &data, encoding)
            }
            ClientMessage::Resize { id, cols, rows } => {
                self.handle_resize(endpoint, &id, cols, rows)
            }
            ClientMessage::Close { id } => self.handle_close(endpoint, &id),
        }
    }

    async fn handle_start(
        &self,
        endpoint: &Endpoint,
        cols: Option<u16>,
        rows: Option<u16>,
        encoding: DataEncoding,
    ) -> RouterResult {
        let dimensions =
            PtyDimensions::or_default(cols, rows, self.manager.settings().default_dimensions);

        let created = self.manager.create(endpoint.id(), dimensions)?;

        info!(
            session_id = %created.id,
            endpoint = endpoint.id(),
            ?encoding,
            "Session started"
        );

        // Ready goes out before the relay starts so it precedes any output.
        let ready = ServerMessage::Ready {
            id: created.id.clone(),
            pid: created.pid,
        };
        if endpoint.outbox().send(ready).await.is_err() {
            debug!(session_id = %created.id, "Endpoint gone before ready");
            self.manager.close(endpoint.id(), &created.id);
            return Ok(None);
        }

        self.manager.spawn_relay(
            created.id,
            created.events,
            OutputEncoder::new(encoding),
            endpoint.outbox().clone(),
        );

        Ok(None)
    }

    fn handle_input(
        &self,
        endpoint: &Endpoint,
        id: &str,
        data: &str,
        encoding: DataEncoding,
    ) -> RouterResult {
        let bytes = encoding.decode(data)?;
        self.manager.write(endpoint.id(), id, bytes);
        Ok(None)
    }

    fn handle_resize(
        &self,
        endpoint: &Endpoint,
        id: &str,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> RouterResult {
        // Unknown sessions are ignored before the size is looked at.
        if !self.manager.owns(endpoint.id(), id) {
            trace!(session_id = %id, "Resize for unknown session ignored");
            return Ok(None);
        }

        let dimensions = match (cols, rows) {
            (Some(cols), Some(rows)) => PtyDimensions::new(cols, rows)?,
            _ => {
                return Err(RouterError::InvalidRequest(
                    "resize requires cols and rows".to_string(),
                ))
            }
        };

        self.manager.resize(endpoint.id(), id, dimensions)?;
        Ok(None)
    }

    fn handle_close(&self, endpoint: &Endpoint, id: &str) -> RouterResult {
        if !self.manager.close(endpoint.id(), id) {
            trace!(session_id = %id, "Close for unknown session ignored");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockPtySystem, SessionSettings};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Harness {
        system: Arc<MockPtySystem>,
        router: MessageRouter,
        endpoint: Endpoint,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn harness() -> Harness {
        harness_with(MockPtySystem::new())
    }

    fn harness_with(system: MockPtySystem) -> Harness {
        let system = Arc::new(system);
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&system) as _,
            SessionSettings::default(),
        ));
        let (tx, rx) = mpsc::channel(64);
        let endpoint = manager.open_endpoint(tx);
        Harness {
            system,
            router: MessageRouter::new(manager),
            endpoint,
            rx,
        }
    }

    impl Harness {
        async fn send(&self, raw: &str) {
            self.router.dispatch(&self.endpoint, raw).await;
        }

        async fn recv(&mut self) -> ServerMessage {
            timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("outbox closed")
        }

        async fn assert_silent(&mut self) {
            let result = timeout(Duration::from_millis(100), self.rx.recv()).await;
            assert!(result.is_err(), "unexpected message: {result:?}");
        }

        async fn start(&mut self) -> String {
            self.send(r#"{"type":"start","cols":80,"rows":24}"#).await;
            match self.recv().await {
                ServerMessage::Ready { id, .. } => id,
                other => panic!("expected ready, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_start_replies_ready() {
        let mut h = harness();
        h.send(r#"{"type":"start","cols":120,"rows":40}"#).await;

        match h.recv().await {
            ServerMessage::Ready { id, pid } => {
                assert_eq!(pid, Some(h.system.process(0).pid()));
                let info = h.router.manager().get(&id).unwrap();
                assert_eq!((info.cols, info.rows), (120, 40));
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_defaults_missing_and_zero_dimensions() {
        let mut h = harness();
        h.send(r#"{"type":"start","cols":0}"#).await;
        let id = match h.recv().await {
            ServerMessage::Ready { id, .. } => id,
            other => panic!("expected ready, got {other:?}"),
        };
        let info = h.router.manager().get(&id).unwrap();
        assert_eq!((info.cols, info.rows), (80, 24));
    }

    #[tokio::test]
    async fn test_start_failure_reports_error() {
        let mut h = harness();
        h.system.fail_spawns("shell not installed");
        h.send(r#"{"type":"start"}"#).await;

        match h.recv().await {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("failed to start terminal:"), "{message}");
                assert!(message.contains("shell not installed"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(h.router.manager().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_report_error() {
        let mut h = harness();
        for raw in ["garbage", r#"{"type":"start""#, r#"{"type":"launch"}"#, r#"{"data":"x"}"#] {
            h.send(raw).await;
            match h.recv().await {
                ServerMessage::Error { message } => {
                    assert!(message.starts_with("malformed message"), "{message}")
                }
                other => panic!("expected error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_input_reaches_process() {
        let mut h = harness();
        let id = h.start().await;

        h.send(&format!(r#"{{"type":"input","id":"{id}","data":"ls\r"}}"#))
            .await;
        h.send(&format!(
            r#"{{"type":"input","id":"{id}","data":"{}","encoding":"base64"}}"#,
            DataEncoding::Base64.encode(&[0x03, 0xff])
        ))
        .await;

        let process = h.system.process(0);
        assert!(process.wait_for_stdin(b"ls\r\x03\xff", Duration::from_secs(2)));
        h.assert_silent().await;
    }

    #[tokio::test]
    async fn test_invalid_base64_input_is_malformed() {
        let mut h = harness();
        let id = h.start().await;

        h.send(&format!(
            r#"{{"type":"input","id":"{id}","data":"%%%","encoding":"base64"}}"#
        ))
        .await;
        assert!(matches!(h.recv().await, ServerMessage::Error { .. }));
        assert!(h.system.process(0).stdin().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_requests_are_silent() {
        let mut h = harness();
        h.send(r#"{"type":"input","id":"nope","data":"x"}"#).await;
        h.send(r#"{"type":"resize","id":"nope"}"#).await;
        h.send(r#"{"type":"resize","id":"nope","cols":0,"rows":0}"#).await;
        h.send(r#"{"type":"close","id":"nope"}"#).await;
        h.assert_silent().await;
    }

    #[tokio::test]
    async fn test_resize_validation() {
        let mut h = harness();
        let id = h.start().await;

        h.send(&format!(r#"{{"type":"resize","id":"{id}","cols":100,"rows":50}}"#))
            .await;
        h.assert_silent().await;
        assert_eq!(
            h.system.process(0).size(),
            PtyDimensions { cols: 100, rows: 50 }
        );

        h.send(&format!(r#"{{"type":"resize","id":"{id}","cols":0,"rows":50}}"#))
            .await;
        assert!(matches!(h.recv().await, ServerMessage::Error { .. }));

        h.send(&format!(r#"{{"type":"resize","id":"{id}","cols":90}}"#))
            .await;
        match h.recv().await {
            ServerMessage::Error { message } => assert!(message.starts_with("invalid request")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(
            h.system.process(0).size(),
            PtyDimensions { cols: 100, rows: 50 }
        );
    }

    #[tokio::test]
    async fn test_close_yields_exit_only() {
        let mut h = harness();
        let id = h.start().await;

        h.send(&format!(r#"{{"type":"close","id":"{id}"}}"#)).await;
        assert_eq!(
            h.recv().await,
            ServerMessage::Exit {
                id: id.clone(),
                code: None
            }
        );
        h.assert_silent().await;

        // Further requests for the exited session are ignored.
        h.send(&format!(r#"{{"type":"input","id":"{id}","data":"x"}}"#))
            .await;
        h.send(&format!(r#"{{"type":"resize","id":"{id}","cols":1,"rows":1}}"#))
            .await;
        h.assert_silent().await;
    }

    #[tokio::test]
    async fn test_base64_output_encoding() {
        let mut h = harness();
        h.send(r#"{"type":"start","encoding":"base64"}"#).await;
        let id = match h.recv().await {
            ServerMessage::Ready { id, .. } => id,
            other => panic!("expected ready, got {other:?}"),
        };

        h.system.process(0).emit_output(&[0x1b, b'[', b'm', 0xfe]);
        match h.recv().await {
            ServerMessage::Output {
                id: out_id,
                data,
                encoding,
            } => {
                assert_eq!(out_id, id);
                assert_eq!(encoding, DataEncoding::Base64);
                assert_eq!(DataEncoding::Base64.decode(&data).unwrap(), [0x1b, b'[', b'm', 0xfe]);
            }
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_echoed_input_round_trip() {
        let mut h = harness_with(MockPtySystem::echoing());
        let id = h.start().await;

        h.send(&format!(r#"{{"type":"input","id":"{id}","data":"hi\r\n"}}"#))
            .await;
        assert_eq!(
            h.recv().await,
            ServerMessage::Output {
                id,
                data: "hi\r\n".to_string(),
                encoding: DataEncoding::Utf8,
            }
        );
    }

    #[test]
    fn test_error_message_rendering() {
        let err = RouterError::from(SessionError::ShellNotFound("/bin/nope".into()));
        assert_eq!(
            err.to_error_message(),
            ServerMessage::error("failed to start terminal: shell not found: /bin/nope")
        );

        let err = RouterError::from(SessionError::LimitReached(10));
        assert_eq!(
            err.to_error_message(),
            ServerMessage::error("failed to start terminal: session limit reached (10 sessions)")
        );

        let err = RouterError::InvalidRequest("bad size".into());
        assert_eq!(
            err.to_error_message(),
            ServerMessage::error("invalid request: bad size")
        );
    }
}
