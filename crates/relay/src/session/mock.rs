//! In-memory PTY backend for tests.
//!
//! [`MockPtySystem`] hands out [`MockProcess`] handles that let a test play
//! the part of the shell: inject output, inspect what was written to stdin,
//! observe resizes and terminate the process with an exit code.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::backend::{ProcessKiller, ProcessWaiter, PtyProcess, PtyResizer, PtySystem, SpawnRequest};
use super::pty::{lock, PtyDimensions, SessionError};

const MOCK_SHELL: &str = "/mock/sh";

#[derive(Default)]
struct Settings {
    failure: Option<String>,
    echo: bool,
    ignore_hangup: bool,
}

/// Test backend that spawns scripted in-memory processes.
#[derive(Default)]
pub struct MockPtySystem {
    settings: Mutex<Settings>,
    processes: Mutex<Vec<MockProcess>>,
    next_pid: AtomicU32,
}

impl MockPtySystem {
    /// Creates a backend whose spawns succeed.
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    /// Creates a backend whose processes echo their input, like a tty in
    /// cooked mode.
    pub fn echoing() -> Self {
        let system = Self::new();
        lock(&system.settings).echo = true;
        system
    }

    /// Makes every following spawn fail with `SpawnFailed(reason)`.
    pub fn fail_spawns(&self, reason: impl Into<String>) {
        lock(&self.settings).failure = Some(reason.into());
    }

    /// Lets following spawns succeed again.
    pub fn allow_spawns(&self) {
        lock(&self.settings).failure = None;
    }

    /// Makes following processes survive the graceful kill.
    pub fn ignore_hangup(&self, ignore: bool) {
        lock(&self.settings).ignore_hangup = ignore;
    }

    /// Number of processes spawned so far.
    pub fn spawn_count(&self) -> usize {
        lock(&self.processes).len()
    }

    /// Returns the `index`-th spawned process.
    ///
    /// # Panics
    /// Panics if fewer processes were spawned.
    pub fn process(&self, index: usize) -> MockProcess {
        lock(&self.processes)[index].clone()
    }

    /// Returns every spawned process, in spawn order.
    pub fn processes(&self) -> Vec<MockProcess> {
        lock(&self.processes).clone()
    }

    /// Number of spawned processes that have not exited.
    pub fn live_count(&self) -> usize {
        lock(&self.processes)
            .iter()
            .filter(|p| !p.has_exited())
            .count()
    }
}

impl PtySystem for MockPtySystem {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtyProcess, SessionError> {
        let (echo, ignore_hangup) = {
            let settings = lock(&self.settings);
            if let Some(ref reason) = settings.failure {
                return Err(SessionError::SpawnFailed(reason.clone()));
            }
            (settings.echo, settings.ignore_hangup)
        };

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (output_tx, output_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            pid,
            request: request.clone(),
            echo,
            ignore_hangup,
            output_tx: Mutex::new(Some(output_tx)),
            stdin: Mutex::new(Vec::new()),
            size: Mutex::new(request.dimensions),
            exit: Mutex::new(None),
            exit_signal: Condvar::new(),
            killed: AtomicBool::new(false),
            force_killed: AtomicBool::new(false),
            kills: AtomicUsize::new(0),
        });

        lock(&self.processes).push(MockProcess(Arc::clone(&shared)));

        Ok(PtyProcess {
            pid: Some(pid),
            shell: request
                .shell
                .clone()
                .unwrap_or_else(|| MOCK_SHELL.to_string()),
            reader: Box::new(MockReader {
                rx: output_rx,
                pending: Vec::new(),
            }),
            writer: Box::new(MockWriter(Arc::clone(&shared))),
            resizer: Box::new(MockResizer(Arc::clone(&shared))),
            waiter: Box::new(MockWaiter(Arc::clone(&shared))),
            killer: Box::new(MockKiller(shared)),
        })
    }
}

struct Shared {
    pid: u32,
    request: SpawnRequest,
    echo: bool,
    ignore_hangup: bool,
    output_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    stdin: Mutex<Vec<u8>>,
    size: Mutex<PtyDimensions>,
    /// `Some(code)` once the process has exited.
    exit: Mutex<Option<Option<i32>>>,
    exit_signal: Condvar,
    killed: AtomicBool,
    force_killed: AtomicBool,
    kills: AtomicUsize,
}

impl Shared {
    fn emit(&self, data: Vec<u8>) {
        if let Some(tx) = lock(&self.output_tx).as_ref() {
            let _ = tx.send(data);
        }
    }

    fn finish(&self, code: Option<i32>) {
        let mut exit = lock(&self.exit);
        if exit.is_some() {
            return;
        }
        *exit = Some(code);
        // Closing the output channel gives the reader its EOF.
        lock(&self.output_tx).take();
        self.exit_signal.notify_all();
    }

    fn exited(&self) -> bool {
        lock(&self.exit).is_some()
    }
}

/// Test handle to a process spawned by [`MockPtySystem`].
#[derive(Clone)]
pub struct MockProcess(Arc<Shared>);

impl MockProcess {
    /// Process ID reported to the session.
    pub fn pid(&self) -> u32 {
        self.0.pid
    }

    /// The request the process was spawned with.
    pub fn request(&self) -> &SpawnRequest {
        &self.0.request
    }

    /// Produces output as if the shell had written it.
    pub fn emit_output(&self, data: &[u8]) {
        self.0.emit(data.to_vec());
    }

    /// Ends the process with the given exit code.
    pub fn exit(&self, code: Option<i32>) {
        self.0.finish(code);
    }

    /// Everything written to the process's stdin so far.
    pub fn stdin(&self) -> Vec<u8> {
        lock(&self.0.stdin).clone()
    }

    /// Polls until stdin equals `expected` or `within` elapses.
    pub fn wait_for_stdin(&self, expected: &[u8], within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if self.stdin() == expected {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Last size applied to the pseudo-terminal.
    pub fn size(&self) -> PtyDimensions {
        *lock(&self.0.size)
    }

    /// Whether a graceful kill was delivered.
    pub fn is_killed(&self) -> bool {
        self.0.killed.load(Ordering::SeqCst)
    }

    /// Whether a forced kill was delivered.
    pub fn is_force_killed(&self) -> bool {
        self.0.force_killed.load(Ordering::SeqCst)
    }

    /// Number of graceful kills delivered.
    pub fn kill_count(&self) -> usize {
        self.0.kills.load(Ordering::SeqCst)
    }

    /// Whether the process has exited.
    pub fn has_exited(&self) -> bool {
        self.0.exited()
    }
}

struct MockReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct MockWriter(Arc<Shared>);

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.0.exited() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "process exited"));
        }
        lock(&self.0.stdin).extend_from_slice(buf);
        if self.0.echo {
            self.0.emit(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MockResizer(Arc<Shared>);

impl PtyResizer for MockResizer {
    fn resize(&self, dimensions: PtyDimensions) -> Result<(), SessionError> {
        *lock(&self.0.size) = dimensions;
        Ok(())
    }
}

struct MockWaiter(Arc<Shared>);

impl ProcessWaiter for MockWaiter {
    fn wait(&mut self) -> io::Result<Option<i32>> {
        let guard = lock(&self.0.exit);
        let guard = self
            .0
            .exit_signal
            .wait_while(guard, |exit| exit.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.flatten())
    }
}

struct MockKiller(Arc<Shared>);

impl ProcessKiller for MockKiller {
    fn kill(&mut self) -> io::Result<()> {
        self.0.killed.store(true, Ordering::SeqCst);
        self.0.kills.fetch_add(1, Ordering::SeqCst);
        if !self.0.ignore_hangup {
            self.0.finish(None);
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.0.force_killed.store(true, Ordering::SeqCst);
        self.0.finish(None);
        Ok(())
    }
}
