//! WebSocket server: accepts endpoint connections and pumps frames between
//! the socket and the message router.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::ServerMessage;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::MessageRouter;
use crate::session::SessionManager;

/// Default capacity of each endpoint's outbound queue.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// WebSocket server relaying endpoint messages to the session manager.
pub struct RelayServer {
    listener: TcpListener,
    router: MessageRouter,
    outbox_capacity: usize,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Binds the listening socket.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        manager: Arc<SessionManager>,
        outbox_capacity: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: MessageRouter::new(manager),
            outbox_capacity: outbox_capacity.max(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token is cancelled, then
    /// terminates every session.
    pub async fn run(self) -> io::Result<()> {
        let RelayServer {
            listener,
            router,
            outbox_capacity,
            shutdown,
        } = self;

        info!(addr = %listener.local_addr()?, "Relay listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        router.clone(),
                        outbox_capacity,
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!("Relay stopping");
        router.manager().shutdown();
        Ok(())
    }
}

/// Handle a single endpoint connection.
///
/// Outbound messages are written by a separate task so a socket that is
/// slow to drain never stalls inbound processing. When the connection ends
/// for any reason the endpoint's sessions are terminated.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: MessageRouter,
    outbox_capacity: usize,
    shutdown: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, error = %e, "WS handshake failed");
            return;
        }
    };

    let (mut sink, mut frames) = ws.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(outbox_capacity);
    let endpoint = router.manager().open_endpoint(tx);
    let endpoint_id = endpoint.id();

    info!(peer = %peer, endpoint = endpoint_id, "Endpoint connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(endpoint = endpoint_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                debug!(endpoint = endpoint_id, error = %e, "WS send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => router.dispatch(&endpoint, &text).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => router.dispatch(&endpoint, text).await,
                Err(_) => {
                    let error =
                        ServerMessage::error("malformed message: binary frame is not UTF-8");
                    let _ = endpoint.outbox().send(error).await;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            // Pings are answered by tungstenite.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(peer = %peer, error = %e, "WS error");
                break;
            }
        }
    }

    drop(endpoint);
    writer.abort();

    info!(peer = %peer, endpoint = endpoint_id, "Endpoint disconnected");
}
