//! Session manager for multiplexing PTY sessions across endpoints.
//!
//! The manager owns the registry of live sessions, each tagged with the
//! endpoint that started it. Lookups are always scoped to the asking
//! endpoint: an endpoint can neither see nor touch another endpoint's
//! sessions. A relay task per session pushes process events to the owning
//! endpoint's outbox.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{OutputEncoder, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::backend::{PtySystem, SpawnRequest};
use super::pty::{
    PtyDimensions, PtyEvent, PtyEvents, PtySession, SessionError, SessionId, SessionState,
    DEFAULT_KILL_GRACE,
};

/// Identifier of a connected endpoint.
pub type EndpointId = u64;

/// Queue of messages bound for one endpoint.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Session creation settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Explicit shell; platform default when `None`.
    pub shell: Option<String>,
    /// Value of `TERM` in the shell's environment.
    pub term: String,
    /// Working directory; the user's home directory when `None`.
    pub working_dir: Option<PathBuf>,
    /// Maximum concurrent sessions across all endpoints.
    pub max_sessions: usize,
    /// Size used for missing or zero dimensions in `start`.
    pub default_dimensions: PtyDimensions,
    /// Delay between hangup and forced kill.
    pub kill_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell: None,
            term: "xterm-256color".to_string(),
            working_dir: None,
            max_sessions: 10,
            default_dimensions: PtyDimensions::default(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Endpoint that owns the session.
    pub owner: EndpointId,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Resolved shell executable.
    pub shell: String,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
    /// Lifecycle state.
    pub state: SessionState,
}

impl SessionInfo {
    fn of(owner: EndpointId, session: &PtySession) -> Self {
        let dimensions = session.dimensions();
        Self {
            id: session.id().clone(),
            owner,
            pid: session.pid(),
            shell: session.shell().to_string(),
            cols: dimensions.cols,
            rows: dimensions.rows,
            state: session.state(),
        }
    }
}

/// A freshly created session, ready to be announced and relayed.
pub struct CreatedSession {
    /// Assigned identifier.
    pub id: SessionId,
    /// Process ID of the shell.
    pub pid: Option<u32>,
    /// Event stream to hand to [`SessionManager::spawn_relay`].
    pub events: PtyEvents,
}

/// Registry entry. `session` is `None` while the session is starting.
struct SessionSlot {
    owner: EndpointId,
    session: Option<Arc<PtySession>>,
}

/// Thread-safe session registry using DashMap.
pub struct SessionManager {
    registry: DashMap<SessionId, SessionSlot>,
    pty_system: Arc<dyn PtySystem>,
    settings: SessionSettings,
    next_endpoint: AtomicU64,
}

impl SessionManager {
    /// Creates a new session manager spawning through `pty_system`.
    pub fn new(pty_system: Arc<dyn PtySystem>, settings: SessionSettings) -> Self {
        Self {
            registry: DashMap::new(),
            pty_system,
            settings,
            next_endpoint: AtomicU64::new(1),
        }
    }

    /// Returns the session settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Registers a newly connected endpoint.
    ///
    /// Dropping the returned handle terminates every session the endpoint
    /// started.
    pub fn open_endpoint(self: &Arc<Self>, outbox: Outbox) -> Endpoint {
        let id = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = id, "Endpoint opened");
        Endpoint {
            id,
            outbox,
            manager: Arc::clone(self),
        }
    }

    /// Creates a session owned by `owner`.
    ///
    /// The identifier is reserved before the process is spawned and the
    /// reservation is dropped again if spawning fails.
    pub fn create(
        &self,
        owner: EndpointId,
        dimensions: PtyDimensions,
    ) -> Result<CreatedSession, SessionError> {
        let id = self.reserve(owner);

        let max = self.settings.max_sessions;
        if self.registry.len() > max {
            self.registry.remove(&id);
            tracing::warn!(endpoint = owner, max_sessions = max, "Session limit reached");
            return Err(SessionError::LimitReached(max));
        }

        let request = self.spawn_request(dimensions);
        let (session, events) = match PtySession::spawn(
            id.clone(),
            self.pty_system.as_ref(),
            &request,
            self.settings.kill_grace,
        ) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.registry.remove(&id);
                tracing::warn!(endpoint = owner, error = %e, "Failed to create session");
                return Err(e);
            }
        };

        let session = Arc::new(session);
        let pid = session.pid();

        match self.registry.get_mut(&id) {
            Some(mut slot) => slot.session = Some(Arc::clone(&session)),
            None => {
                // The endpoint went away while the shell was starting.
                session.terminate();
                return Err(SessionError::SpawnFailed(
                    "endpoint closed during start".to_string(),
                ));
            }
        }

        tracing::info!(
            session_id = %id,
            endpoint = owner,
            pid = ?pid,
            cols = dimensions.cols,
            rows = dimensions.rows,
            "Created new session"
        );

        Ok(CreatedSession { id, pid, events })
    }

    fn reserve(&self, owner: EndpointId) -> SessionId {
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(vacant) = self.registry.entry(id.clone()) {
                vacant.insert(SessionSlot {
                    owner,
                    session: None,
                });
                return id;
            }
        }
    }

    fn spawn_request(&self, dimensions: PtyDimensions) -> SpawnRequest {
        SpawnRequest {
            shell: self.settings.shell.clone(),
            dimensions,
            cwd: self.settings.working_dir.clone().or_else(dirs::home_dir),
            env: vec![("TERM".to_string(), self.settings.term.clone())],
        }
    }

    /// Returns the running session `id` if `owner` owns it.
    fn lookup(&self, owner: EndpointId, id: &str) -> Option<Arc<PtySession>> {
        let slot = self.registry.get(id)?;
        if slot.owner != owner {
            return None;
        }
        slot.session.clone()
    }

    /// Returns whether `owner` owns a running session `id`.
    pub fn owns(&self, owner: EndpointId, id: &str) -> bool {
        self.lookup(owner, id).is_some()
    }

    /// Queues input for an owned session. Returns false on a miss.
    pub fn write(&self, owner: EndpointId, id: &str, data: Vec<u8>) -> bool {
        match self.lookup(owner, id) {
            Some(session) => session.write(data),
            None => {
                tracing::trace!(session_id = %id, endpoint = owner, "Input for unknown session");
                false
            }
        }
    }

    /// Resizes an owned session. Returns `Ok(false)` on a miss.
    pub fn resize(
        &self,
        owner: EndpointId,
        id: &str,
        dimensions: PtyDimensions,
    ) -> Result<bool, SessionError> {
        match self.lookup(owner, id) {
            Some(session) => session.resize(dimensions),
            None => {
                tracing::trace!(session_id = %id, endpoint = owner, "Resize for unknown session");
                Ok(false)
            }
        }
    }

    /// Terminates an owned session. Returns false on a miss.
    ///
    /// The relay task still delivers the session's `exit`.
    pub fn close(&self, owner: EndpointId, id: &str) -> bool {
        match self.registry.remove_if(id, |_, slot| slot.owner == owner) {
            Some((_, slot)) => {
                if let Some(session) = slot.session {
                    session.terminate();
                }
                tracing::info!(session_id = %id, endpoint = owner, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Terminates every session `owner` owns. Returns how many were removed.
    pub fn close_endpoint(&self, owner: EndpointId) -> usize {
        let owned: Vec<SessionId> = self
            .registry
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for id in owned {
            if let Some((_, slot)) = self.registry.remove_if(&id, |_, slot| slot.owner == owner) {
                if let Some(session) = slot.session {
                    session.terminate();
                }
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!(endpoint = owner, sessions = closed, "Closed endpoint sessions");
        }
        closed
    }

    /// Starts the task that relays a session's events to `outbox`.
    ///
    /// Output is forwarded chunk by chunk. On exit the session leaves the
    /// registry first, then any held-back partial character is flushed and
    /// `exit` is sent last. Requests racing the final messages are misses.
    pub fn spawn_relay(
        self: &Arc<Self>,
        id: SessionId,
        mut events: PtyEvents,
        mut encoder: OutputEncoder,
        outbox: Outbox,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    PtyEvent::Output(chunk) => {
                        if let Some(data) = encoder.encode(&chunk) {
                            let message = ServerMessage::Output {
                                id: id.clone(),
                                data,
                                encoding: encoder.encoding(),
                            };
                            deliver(&outbox, &id, message).await;
                        }
                    }
                    PtyEvent::Exit { code } => {
                        // A dead session must not linger while a slow
                        // endpoint drains the final messages.
                        manager.registry.remove(&id);
                        tracing::info!(session_id = %id, code = ?code, "Session exited");

                        if let Some(data) = encoder.finish() {
                            let message = ServerMessage::Output {
                                id: id.clone(),
                                data,
                                encoding: encoder.encoding(),
                            };
                            deliver(&outbox, &id, message).await;
                        }

                        deliver(&outbox, &id, ServerMessage::Exit { id: id.clone(), code }).await;
                        break;
                    }
                }
            }
        })
    }

    /// Lists all running sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.registry
            .iter()
            .filter_map(|entry| {
                entry
                    .session
                    .as_ref()
                    .map(|session| SessionInfo::of(entry.owner, session))
            })
            .collect()
    }

    /// Gets information about a specific session.
    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        let slot = self.registry.get(id)?;
        slot.session
            .as_ref()
            .map(|session| SessionInfo::of(slot.owner, session))
    }

    /// Checks if a session exists and is running.
    pub fn exists(&self, id: &str) -> bool {
        self.registry
            .get(id)
            .and_then(|slot| slot.session.as_ref().map(|s| s.is_running()))
            .unwrap_or(false)
    }

    /// Returns the number of registered sessions, including ones still
    /// starting.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    /// Terminates every session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.registry.iter().map(|e| e.key().clone()).collect();
        let mut terminated = 0;
        for id in ids {
            if let Some((_, slot)) = self.registry.remove(&id) {
                if let Some(session) = slot.session {
                    session.terminate();
                    terminated += 1;
                }
            }
        }
        tracing::info!(sessions = terminated, "Session manager shut down");
    }
}

async fn deliver(outbox: &Outbox, id: &str, message: ServerMessage) {
    if outbox.send(message).await.is_err() {
        tracing::debug!(session_id = %id, "Endpoint gone, dropping message");
    }
}

/// Handle for one connected endpoint.
///
/// Dropping it terminates the endpoint's sessions.
pub struct Endpoint {
    id: EndpointId,
    outbox: Outbox,
    manager: Arc<SessionManager>,
}

impl Endpoint {
    /// Returns the endpoint ID.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Returns the endpoint's outbound queue.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Returns the manager this endpoint is registered with.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.manager.close_endpoint(self.id);
        tracing::debug!(endpoint = self.id, "Endpoint closed");
    }
}
