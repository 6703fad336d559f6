//! PTY session lifecycle.
//!
//! A [`PtySession`] pairs one shell process with one pseudo-terminal. All
//! blocking I/O runs on three dedicated OS threads per session (reader,
//! writer, waiter) so a stalled process never holds up the async runtime or
//! another session. Process events are consumed through [`PtyEvents`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::backend::{ProcessKiller, ProcessWaiter, PtyProcess, PtyResizer, PtySystem, SpawnRequest};

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The shell executable could not be located.
    #[error("shell not found: {0}")]
    ShellNotFound(String),

    /// The OS refused to allocate the PTY or spawn the process.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Terminal dimensions must both be non-zero.
    #[error("invalid terminal size: {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },

    /// The configured number of concurrent sessions is in use.
    #[error("session limit reached ({0} sessions)")]
    LimitReached(usize),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Returns true for errors that prevent a session from being created.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            SessionError::ShellNotFound(_)
                | SessionError::SpawnFailed(_)
                | SessionError::LimitReached(_)
                | SessionError::Io(_)
        )
    }
}

/// Lifecycle state of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Process spawned, I/O threads not yet running.
    Starting,
    /// Process running and relayed.
    Running,
    /// Terminated or exited. Terminal.
    Exited,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Running,
            _ => SessionState::Exited,
        }
    }
}

/// Monotonic state cell shared between a session and its event stream.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Starting as u8))
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `to` unless already past it; returns the previous state.
    fn advance(&self, to: SessionState) -> SessionState {
        SessionState::from_u8(self.0.fetch_max(to as u8, Ordering::AcqRel))
    }
}

/// Terminal window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyDimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyDimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl PtyDimensions {
    /// Validated dimensions; both values must be non-zero.
    pub fn new(cols: u16, rows: u16) -> Result<Self, SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidSize { cols, rows });
        }
        Ok(Self { cols, rows })
    }

    /// Builds dimensions from optional request values, replacing missing or
    /// zero fields with `fallback`.
    pub fn or_default(cols: Option<u16>, rows: Option<u16>, fallback: PtyDimensions) -> Self {
        Self {
            cols: cols.filter(|c| *c > 0).unwrap_or(fallback.cols),
            rows: rows.filter(|r| *r > 0).unwrap_or(fallback.rows),
        }
    }

    fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

/// An event produced by a session's process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of process output, in production order.
    Output(Vec<u8>),
    /// The process terminated. Always the final event.
    Exit { code: Option<i32> },
}

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Output chunks buffered between the reader thread and the event stream.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// How long output is still collected after the process exits.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Default delay between the hangup and the forced kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(2000);

struct Control {
    resizer: Box<dyn PtyResizer>,
    dimensions: PtyDimensions,
}

/// A shell process running on a pseudo-terminal.
///
/// Dropping a session that has not exited terminates its process.
pub struct PtySession {
    id: SessionId,
    pid: Option<u32>,
    shell: String,
    state: Arc<StateCell>,
    control: Mutex<Control>,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    killer: Arc<Mutex<Box<dyn ProcessKiller>>>,
    process_exited: Arc<AtomicBool>,
    kill_grace: Duration,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("shell", &self.shell)
            .field("state", &self.state())
            .finish()
    }
}

impl PtySession {
    /// Spawns a shell through `system` and starts its I/O threads.
    ///
    /// # Returns
    /// The running session and the stream of its process events.
    pub fn spawn(
        id: SessionId,
        system: &dyn PtySystem,
        request: &SpawnRequest,
        kill_grace: Duration,
    ) -> Result<(Self, PtyEvents), SessionError> {
        if !request.dimensions.is_valid() {
            return Err(SessionError::InvalidSize {
                cols: request.dimensions.cols,
                rows: request.dimensions.rows,
            });
        }

        let PtyProcess {
            pid,
            shell,
            reader,
            writer,
            resizer,
            waiter,
            killer,
        } = system.spawn(request)?;

        let state = Arc::new(StateCell::new());
        let killer = Arc::new(Mutex::new(killer));
        let process_exited = Arc::new(AtomicBool::new(false));

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let started = spawn_reader(&id, reader, output_tx)
            .and_then(|_| spawn_writer(&id, writer, input_rx))
            .and_then(|_| spawn_waiter(&id, waiter, Arc::clone(&process_exited), exit_tx));

        if let Err(e) = started {
            tracing::error!(session_id = %id, error = %e, "Failed to start session I/O threads");
            if let Err(kill_err) = lock(&killer).force_kill() {
                tracing::debug!(session_id = %id, error = %kill_err, "Kill after failed start");
            }
            return Err(SessionError::Io(e));
        }

        state.advance(SessionState::Running);

        tracing::info!(
            session_id = %id,
            pid = ?pid,
            shell = %shell,
            cols = request.dimensions.cols,
            rows = request.dimensions.rows,
            "Spawned PTY session"
        );

        let events = PtyEvents {
            id: id.clone(),
            output_rx,
            exit_rx,
            output_closed: false,
            state: Arc::clone(&state),
            phase: Phase::Streaming,
        };

        let session = PtySession {
            id,
            pid,
            shell,
            state,
            control: Mutex::new(Control {
                resizer,
                dimensions: request.dimensions,
            }),
            input_tx,
            killer,
            process_exited,
            kill_grace,
        };

        Ok((session, events))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the resolved shell executable.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Returns whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Returns the last dimensions applied to the PTY.
    pub fn dimensions(&self) -> PtyDimensions {
        lock(&self.control).dimensions
    }

    /// Queues bytes for the process's standard input.
    ///
    /// Never blocks. Returns false (and drops the bytes) once the session
    /// has exited.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        if self.state() == SessionState::Exited {
            tracing::trace!(session_id = %self.id, "Write after exit ignored");
            return false;
        }

        let data = data.into();
        if data.is_empty() {
            return true;
        }
        self.input_tx.send(data).is_ok()
    }

    /// Resizes the PTY.
    ///
    /// Returns `Ok(false)` when the session has already exited.
    pub fn resize(&self, dimensions: PtyDimensions) -> Result<bool, SessionError> {
        if !dimensions.is_valid() {
            return Err(SessionError::InvalidSize {
                cols: dimensions.cols,
                rows: dimensions.rows,
            });
        }

        let mut control = lock(&self.control);
        if self.state() == SessionState::Exited {
            return Ok(false);
        }

        control.resizer.resize(dimensions)?;
        control.dimensions = dimensions;

        tracing::debug!(
            session_id = %self.id,
            cols = dimensions.cols,
            rows = dimensions.rows,
            "Resized PTY"
        );

        Ok(true)
    }

    /// Terminates the process.
    ///
    /// The first call marks the session exited and sends a hangup; if the
    /// process is still alive after the kill grace period it is killed
    /// outright. Later calls do nothing. Returns whether this call did the
    /// termination.
    pub fn terminate(&self) -> bool {
        if self.state.advance(SessionState::Exited) == SessionState::Exited {
            return false;
        }

        tracing::info!(session_id = %self.id, pid = ?self.pid, "Terminating session");

        if self.process_exited.load(Ordering::Acquire) {
            return true;
        }

        if let Err(e) = lock(&self.killer).kill() {
            tracing::debug!(session_id = %self.id, error = %e, "Hangup failed");
        }
        self.schedule_force_kill();

        true
    }

    fn schedule_force_kill(&self) {
        let killer = Arc::clone(&self.killer);
        let exited = Arc::clone(&self.process_exited);
        let id = self.id.clone();
        let grace = self.kill_grace;

        let escalate = move || {
            if exited.load(Ordering::Acquire) {
                return;
            }
            tracing::warn!(session_id = %id, "Process survived hangup, sending SIGKILL");
            if let Err(e) = lock(&killer).force_kill() {
                tracing::debug!(session_id = %id, error = %e, "Forced kill failed");
            }
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    escalate();
                });
            }
            Err(_) => {
                let spawned = thread::Builder::new()
                    .name("pty-kill".to_string())
                    .spawn(move || {
                        thread::sleep(grace);
                        escalate();
                    });
                if let Err(e) = spawned {
                    tracing::error!(
                        session_id = %self.id,
                        error = %e,
                        "Failed to schedule forced kill"
                    );
                }
            }
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Locks a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn thread_name(role: &str, id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("pty-{role}-{short}")
}

fn spawn_reader(
    id: &str,
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Vec<u8>>,
) -> io::Result<()> {
    let session_id = id.to_string();
    thread::Builder::new()
        .name(thread_name("reader", id))
        .spawn(move || {
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        tracing::debug!(session_id = %session_id, "PTY EOF");
                        break;
                    }
                    Ok(n) => {
                        if output_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is how Linux reports a hung-up slave.
                        tracing::debug!(session_id = %session_id, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
        })
        .map(|_| ())
}

fn spawn_writer(
    id: &str,
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> io::Result<()> {
    let session_id = id.to_string();
    thread::Builder::new()
        .name(thread_name("writer", id))
        .spawn(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    tracing::debug!(
                        session_id = %session_id,
                        error = %e,
                        "PTY write failed, dropping queued input"
                    );
                    break;
                }
            }
        })
        .map(|_| ())
}

fn spawn_waiter(
    id: &str,
    mut waiter: Box<dyn ProcessWaiter>,
    process_exited: Arc<AtomicBool>,
    exit_tx: oneshot::Sender<Option<i32>>,
) -> io::Result<()> {
    let session_id = id.to_string();
    thread::Builder::new()
        .name(thread_name("waiter", id))
        .spawn(move || {
            let code = match waiter.wait() {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to wait for process"
                    );
                    None
                }
            };
            process_exited.store(true, Ordering::Release);
            tracing::info!(session_id = %session_id, code = ?code, "Process exited");
            let _ = exit_tx.send(code);
        })
        .map(|_| ())
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Streaming,
    Draining { code: Option<i32>, deadline: Instant },
    Done { code: Option<i32> },
    Finished,
}

enum Step {
    Output(Option<Vec<u8>>),
    Exited(Option<i32>),
}

/// Asynchronous stream of a session's process events.
///
/// Yields output chunks in production order, then exactly one
/// [`PtyEvent::Exit`], then `None` forever.
pub struct PtyEvents {
    id: SessionId,
    output_rx: mpsc::Receiver<Vec<u8>>,
    exit_rx: oneshot::Receiver<Option<i32>>,
    output_closed: bool,
    state: Arc<StateCell>,
    phase: Phase,
}

impl PtyEvents {
    /// Returns the ID of the session these events belong to.
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn terminated(&self) -> bool {
        self.state.get() == SessionState::Exited
    }

    /// Waits for the next event.
    pub async fn next(&mut self) -> Option<PtyEvent> {
        loop {
            match self.phase {
                Phase::Streaming => {
                    let Self {
                        output_rx,
                        exit_rx,
                        output_closed,
                        ..
                    } = self;

                    let step = tokio::select! {
                        chunk = output_rx.recv(), if !*output_closed => Step::Output(chunk),
                        code = exit_rx => Step::Exited(code.ok().flatten()),
                    };

                    match step {
                        Step::Output(Some(chunk)) => {
                            if self.terminated() {
                                continue;
                            }
                            return Some(PtyEvent::Output(chunk));
                        }
                        Step::Output(None) => self.output_closed = true,
                        Step::Exited(code) => {
                            self.phase = Phase::Draining {
                                code,
                                deadline: Instant::now() + EXIT_DRAIN_TIMEOUT,
                            };
                        }
                    }
                }
                Phase::Draining { code, deadline } => {
                    if self.output_closed || self.terminated() {
                        self.phase = Phase::Done { code };
                        continue;
                    }
                    match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                        Ok(Some(chunk)) => return Some(PtyEvent::Output(chunk)),
                        Ok(None) => self.output_closed = true,
                        Err(_) => {
                            tracing::debug!(session_id = %self.id, "Output drain timed out");
                            self.phase = Phase::Done { code };
                        }
                    }
                }
                Phase::Done { code } => {
                    self.state.advance(SessionState::Exited);
                    self.phase = Phase::Finished;
                    return Some(PtyEvent::Exit { code });
                }
                Phase::Finished => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::backend::NativePtySystem;
    use crate::session::mock::MockPtySystem;
    use tokio::time::timeout;

    fn request() -> SpawnRequest {
        SpawnRequest::default()
    }

    fn spawn_mock(system: &MockPtySystem) -> (PtySession, PtyEvents) {
        PtySession::spawn("mock-session".to_string(), system, &request(), DEFAULT_KILL_GRACE)
            .unwrap()
    }

    async fn collect_until_exit(events: &mut PtyEvents) -> (Vec<u8>, Option<i32>) {
        let mut output = Vec::new();
        loop {
            match timeout(Duration::from_secs(5), events.next()).await {
                Ok(Some(PtyEvent::Output(chunk))) => output.extend_from_slice(&chunk),
                Ok(Some(PtyEvent::Exit { code })) => return (output, code),
                Ok(None) => panic!("stream ended without exit"),
                Err(_) => panic!("timed out waiting for exit"),
            }
        }
    }

    #[test]
    fn test_state_cell_is_monotonic() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SessionState::Starting);
        assert_eq!(cell.advance(SessionState::Exited), SessionState::Starting);
        assert_eq!(cell.advance(SessionState::Running), SessionState::Exited);
        assert_eq!(cell.get(), SessionState::Exited);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(PtyDimensions::default(), PtyDimensions { cols: 80, rows: 24 });
        assert!(matches!(
            PtyDimensions::new(0, 24),
            Err(SessionError::InvalidSize { cols: 0, rows: 24 })
        ));

        let fallback = PtyDimensions { cols: 100, rows: 30 };
        assert_eq!(
            PtyDimensions::or_default(None, Some(0), fallback),
            PtyDimensions { cols: 100, rows: 30 }
        );
        assert_eq!(
            PtyDimensions::or_default(Some(132), None, fallback),
            PtyDimensions { cols: 132, rows: 30 }
        );
    }

    #[test]
    fn test_spawn_failure_classification() {
        assert!(SessionError::ShellNotFound("zsh".into()).is_spawn_failure());
        assert!(SessionError::LimitReached(10).is_spawn_failure());
        assert!(!SessionError::ResizeFailed("x".into()).is_spawn_failure());
        assert!(!SessionError::InvalidSize { cols: 0, rows: 0 }.is_spawn_failure());
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_size() {
        let system = MockPtySystem::new();
        let req = SpawnRequest {
            dimensions: PtyDimensions { cols: 0, rows: 24 },
            ..Default::default()
        };
        let result = PtySession::spawn("s".into(), &system, &req, DEFAULT_KILL_GRACE);
        assert!(matches!(result, Err(SessionError::InvalidSize { .. })));
        assert_eq!(system.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let system = MockPtySystem::new();
        system.fail_spawns("no ptys left");
        let result = PtySession::spawn("s".into(), &system, &request(), DEFAULT_KILL_GRACE);
        assert!(matches!(result, Err(SessionError::SpawnFailed(ref m)) if m == "no ptys left"));
    }

    #[tokio::test]
    async fn test_output_then_exit() {
        let system = MockPtySystem::new();
        let (session, mut events) = spawn_mock(&system);
        assert!(session.is_running());
        assert_eq!(session.pid(), Some(system.process(0).pid()));

        let process = system.process(0);
        process.emit_output(b"hello ");
        process.emit_output(b"world");
        process.exit(Some(3));

        let (output, code) = collect_until_exit(&mut events).await;
        assert_eq!(output, b"hello world");
        assert_eq!(code, Some(3));
        assert_eq!(session.state(), SessionState::Exited);

        // Exit is final.
        assert_eq!(events.next().await, None);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_write_preserves_order() {
        let system = MockPtySystem::new();
        let (session, _events) = spawn_mock(&system);

        for part in ["a", "bc", "", "def", "\r\n"] {
            assert!(session.write(part.as_bytes()));
        }

        let process = system.process(0);
        assert!(process.wait_for_stdin(b"abcdef\r\n", Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_write_and_resize_after_exit_are_noops() {
        let system = MockPtySystem::new();
        let (session, mut events) = spawn_mock(&system);
        let process = system.process(0);

        process.exit(Some(0));
        collect_until_exit(&mut events).await;

        assert!(!session.write(b"ignored".to_vec()));
        assert!(!session.resize(PtyDimensions { cols: 100, rows: 50 }).unwrap());
        assert_eq!(session.dimensions(), PtyDimensions::default());
        assert!(process.stdin().is_empty());
    }

    #[tokio::test]
    async fn test_resize_updates_dimensions() {
        let system = MockPtySystem::new();
        let (session, _events) = spawn_mock(&system);

        let dims = PtyDimensions { cols: 120, rows: 40 };
        assert!(session.resize(dims).unwrap());
        assert_eq!(session.dimensions(), dims);
        assert_eq!(system.process(0).size(), dims);

        let result = session.resize(PtyDimensions { cols: 0, rows: 40 });
        assert!(matches!(result, Err(SessionError::InvalidSize { .. })));
        assert_eq!(session.dimensions(), dims);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let system = MockPtySystem::new();
        let (session, mut events) = spawn_mock(&system);

        assert!(session.terminate());
        assert!(!session.terminate());
        assert!(!session.terminate());
        assert_eq!(session.state(), SessionState::Exited);

        let process = system.process(0);
        assert!(process.is_killed());
        assert_eq!(process.kill_count(), 1);

        let (_, code) = collect_until_exit(&mut events).await;
        assert_eq!(code, None);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_no_output_after_terminate() {
        let system = MockPtySystem::new();
        let (session, mut events) = spawn_mock(&system);
        let process = system.process(0);

        session.terminate();
        process.emit_output(b"late output");

        let (output, _) = collect_until_exit(&mut events).await;
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_drop_terminates() {
        let system = MockPtySystem::new();
        let (session, mut events) = spawn_mock(&system);
        drop(session);

        assert!(system.process(0).is_killed());
        let (_, code) = collect_until_exit(&mut events).await;
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn test_force_kill_after_grace() {
        let system = MockPtySystem::new();
        system.ignore_hangup(true);
        let (session, _events) =
            PtySession::spawn("s".into(), &system, &request(), Duration::from_millis(20)).unwrap();
        let process = system.process(0);

        session.terminate();
        assert!(process.is_killed());
        assert!(!process.is_force_killed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(process.is_force_killed());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_native_echo_and_exit() {
        let req = SpawnRequest {
            shell: Some("/bin/sh".to_string()),
            env: vec![("TEST_VAR".to_string(), "test_value".to_string())],
            ..Default::default()
        };
        let (session, mut events) =
            PtySession::spawn("native".into(), &NativePtySystem::new(), &req, DEFAULT_KILL_GRACE)
                .unwrap();
        assert!(session.pid().is_some());

        session.write(b"echo marker_$TEST_VAR\n".to_vec());
        session.write(b"exit 42\n".to_vec());

        let (output, code) = collect_until_exit(&mut events).await;
        let output = String::from_utf8_lossy(&output);
        assert!(output.contains("marker_test_value"), "output was {output:?}");
        assert_eq!(code, Some(42));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_native_terminate() {
        let req = SpawnRequest {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let (session, mut events) =
            PtySession::spawn("native".into(), &NativePtySystem::new(), &req, DEFAULT_KILL_GRACE)
                .unwrap();

        session
            .resize(PtyDimensions { cols: 120, rows: 40 })
            .unwrap();
        assert!(session.terminate());

        let result = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(PtyEvent::Exit { .. }) = events.next().await {
                    break;
                }
            }
        })
        .await;
        assert!(result.is_ok(), "terminated shell never reported exit");
    }
}
