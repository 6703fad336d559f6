//! Pseudo-terminal backends.
//!
//! [`PtySystem`] is the seam between session lifecycle code and the OS. The
//! native implementation wraps `portable-pty`; tests use
//! [`MockPtySystem`](super::mock::MockPtySystem).

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use super::pty::{PtyDimensions, SessionError};

/// Default shell per host platform, keyed by `std::env::consts::OS`.
const PLATFORM_SHELLS: &[(&str, &str)] = &[
    ("macos", "/bin/zsh"),
    ("linux", "/bin/bash"),
    ("freebsd", "/bin/sh"),
    ("openbsd", "/bin/ksh"),
    ("windows", "powershell.exe"),
];

/// Shell used when the platform has no table entry or its entry is missing.
#[cfg(windows)]
const FALLBACK_SHELL: &str = "cmd.exe";
#[cfg(not(windows))]
const FALLBACK_SHELL: &str = "/bin/sh";

/// Parameters for spawning a shell on a new pseudo-terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Explicit shell. `None` selects the platform default.
    pub shell: Option<String>,
    /// Initial window size.
    pub dimensions: PtyDimensions,
    /// Working directory for the shell.
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Resizes the pseudo-terminal window.
pub trait PtyResizer: Send {
    /// Applies the new window size to the master side.
    fn resize(&self, dimensions: PtyDimensions) -> Result<(), SessionError>;
}

/// Blocks until the process exits.
pub trait ProcessWaiter: Send {
    /// Waits for exit and returns the exit code, when known.
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

/// Delivers termination signals to the process.
pub trait ProcessKiller: Send {
    /// Asks the process to terminate.
    fn kill(&mut self) -> io::Result<()>;

    /// Terminates the process unconditionally.
    fn force_kill(&mut self) -> io::Result<()> {
        self.kill()
    }
}

/// A spawned process bound to a pseudo-terminal, split into the handles the
/// session hands out to its I/O threads.
pub struct PtyProcess {
    /// Process ID, when the platform reports one.
    pub pid: Option<u32>,
    /// Resolved shell executable.
    pub shell: String,
    /// Output side of the master (process stdout/stderr).
    pub reader: Box<dyn Read + Send>,
    /// Input side of the master (process stdin).
    pub writer: Box<dyn Write + Send>,
    /// Window size control.
    pub resizer: Box<dyn PtyResizer>,
    /// Exit observation.
    pub waiter: Box<dyn ProcessWaiter>,
    /// Termination control.
    pub killer: Box<dyn ProcessKiller>,
}

/// Allocates pseudo-terminals and spawns shells on them.
pub trait PtySystem: Send + Sync {
    /// Spawns a shell on a new pseudo-terminal.
    fn spawn(&self, request: &SpawnRequest) -> Result<PtyProcess, SessionError>;
}

/// Returns the table shell for a platform identifier.
pub fn platform_shell(os: &str) -> Option<&'static str> {
    PLATFORM_SHELLS
        .iter()
        .find(|(platform, _)| *platform == os)
        .map(|(_, shell)| *shell)
}

/// Resolves the shell executable to launch.
///
/// An explicit shell must exist. Otherwise the platform table entry is tried
/// first, then the platform fallback.
pub fn resolve_shell(explicit: Option<&str>) -> Result<PathBuf, SessionError> {
    if let Some(shell) = explicit.filter(|s| !s.is_empty()) {
        return locate(shell).ok_or_else(|| SessionError::ShellNotFound(shell.to_string()));
    }

    let preferred = platform_shell(std::env::consts::OS).unwrap_or(FALLBACK_SHELL);
    locate(preferred)
        .or_else(|| locate(FALLBACK_SHELL))
        .ok_or_else(|| SessionError::ShellNotFound(preferred.to_string()))
}

fn locate(shell: &str) -> Option<PathBuf> {
    which::which(Path::new(shell)).ok()
}

/// Backend that spawns real processes through `portable-pty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySystem;

impl NativePtySystem {
    /// Creates the native backend.
    pub fn new() -> Self {
        Self
    }
}

impl PtySystem for NativePtySystem {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtyProcess, SessionError> {
        let shell = resolve_shell(request.shell.as_deref())?;

        let pair = native_pty_system()
            .openpty(request.dimensions.into())
            .map_err(|e| SessionError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        if let Some(ref dir) = request.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| {
                SessionError::SpawnFailed(format!("failed to spawn {}: {e}", shell.display()))
            })?;

        // The child holds its own copy of the slave; ours would keep the
        // master from seeing EOF when the shell exits.
        drop(pair.slave);

        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(format!("failed to take writer: {e}")))?;

        let killer = NativeKiller {
            signaller: child.clone_killer(),
            pid,
        };

        Ok(PtyProcess {
            pid,
            shell: shell.display().to_string(),
            reader,
            writer,
            resizer: Box::new(NativeResizer(pair.master)),
            waiter: Box::new(NativeWaiter(child)),
            killer: Box::new(killer),
        })
    }
}

impl From<PtyDimensions> for PtySize {
    fn from(dimensions: PtyDimensions) -> Self {
        PtySize {
            rows: dimensions.rows,
            cols: dimensions.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

struct NativeResizer(Box<dyn MasterPty + Send>);

impl PtyResizer for NativeResizer {
    fn resize(&self, dimensions: PtyDimensions) -> Result<(), SessionError> {
        self.0
            .resize(dimensions.into())
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }
}

struct NativeWaiter(Box<dyn Child + Send + Sync>);

impl ProcessWaiter for NativeWaiter {
    fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.0.wait()?;
        Ok(Some(status.exit_code() as i32))
    }
}

struct NativeKiller {
    signaller: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl ProcessKiller for NativeKiller {
    fn kill(&mut self) -> io::Result<()> {
        self.signaller.kill()
    }

    #[cfg(unix)]
    fn force_kill(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.pid {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(io::Error::from),
            None => self.signaller.kill(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_shell_table() {
        assert_eq!(platform_shell("macos"), Some("/bin/zsh"));
        assert_eq!(platform_shell("linux"), Some("/bin/bash"));
        assert_eq!(platform_shell("windows"), Some("powershell.exe"));
        assert_eq!(platform_shell("plan9"), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_explicit_shell() {
        let shell = resolve_shell(Some("/bin/sh")).unwrap();
        assert_eq!(shell, PathBuf::from("/bin/sh"));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_shell_from_path() {
        let shell = resolve_shell(Some("sh")).unwrap();
        assert!(shell.is_absolute());
    }

    #[test]
    fn test_resolve_missing_explicit_shell() {
        let result = resolve_shell(Some("/nonexistent/path/to/shell"));
        assert!(matches!(
            result,
            Err(SessionError::ShellNotFound(ref s)) if s == "/nonexistent/path/to/shell"
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_platform_default() {
        // Empty explicit shell falls through to the table.
        let shell = resolve_shell(Some("")).unwrap();
        assert!(shell.exists());
    }

    #[test]
    fn test_dimensions_into_pty_size() {
        let size: PtySize = PtyDimensions { cols: 132, rows: 43 }.into();
        assert_eq!(size.cols, 132);
        assert_eq!(size.rows, 43);
        assert_eq!(size.pixel_width, 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_native_spawn_missing_shell() {
        let request = SpawnRequest {
            shell: Some("/nonexistent/shell".to_string()),
            ..Default::default()
        };
        let result = NativePtySystem::new().spawn(&request);
        assert!(matches!(result, Err(SessionError::ShellNotFound(_))));
    }
}
