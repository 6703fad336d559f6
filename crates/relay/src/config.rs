//! Configuration management for the PtyRelay server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ptyrelay/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{PtyDimensions, SessionSettings};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("default terminal size must be non-zero, got {cols}x{rows}")]
    InvalidDimensions { cols: u16, rows: u16 },

    #[error("listen must be a socket address like 127.0.0.1:3002, got {0}")]
    InvalidListenAddress(String),

    #[error("default_shell not found: {0}")]
    InvalidShellPath(String),

    #[error("working_dir does not exist: {0}")]
    InvalidWorkingDir(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("outbox_capacity must be greater than 0")]
    InvalidOutboxCapacity,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Server and logging configuration.
    pub relay: RelayConfig,

    /// Session management configuration.
    pub session: SessionConfig,
}

/// Server and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket server binds to.
    pub listen: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily-rolling log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Messages buffered per endpoint before session output back-pressures.
    pub outbox_capacity: usize,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell for new sessions. The platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<String>,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Columns used when `start` omits them.
    pub default_cols: u16,

    /// Rows used when `start` omits them.
    pub default_rows: u16,

    /// Value of `TERM` in the shell's environment.
    pub term: String,

    /// Working directory for new shells. The home directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Milliseconds between the hangup and the forced kill on terminate.
    pub kill_grace_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3002".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
            outbox_capacity: 256,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            max_sessions: 10,
            default_cols: 80,
            default_rows: 24,
            term: "xterm-256color".to_string(),
            working_dir: None,
            kill_grace_ms: 2000,
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        SessionSettings {
            shell: config.default_shell.clone(),
            term: config.term.clone(),
            working_dir: config.working_dir.clone(),
            max_sessions: config.max_sessions,
            default_dimensions: PtyDimensions {
                cols: config.default_cols,
                rows: config.default_rows,
            },
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ptyrelay")
        .join("config.toml")
}

/// Reads a non-empty environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PTYRELAY_LISTEN: Override the listen address
    /// - PTYRELAY_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - PTYRELAY_SHELL: Override the default shell
    ///
    /// Returns the `(setting, value)` pairs that were overridden. This runs
    /// before logging is configured, so the caller logs them afterwards.
    pub fn apply_env_overrides(&mut self) -> Vec<(&'static str, String)> {
        let mut applied = Vec::new();

        if let Some(listen) = env_value("PTYRELAY_LISTEN") {
            applied.push(("listen", listen.clone()));
            self.relay.listen = listen;
        }

        if let Some(level) = env_value("PTYRELAY_LOG_LEVEL") {
            applied.push(("log_level", level.clone()));
            self.relay.log_level = level;
        }

        if let Some(shell) = env_value("PTYRELAY_SHELL") {
            applied.push(("default_shell", shell.clone()));
            self.session.default_shell = Some(shell);
        }

        applied
    }

    /// Returns the parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.relay
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(self.relay.listen.clone()))
    }

    /// Returns the session settings derived from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.session)
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < 1 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.default_cols == 0 || self.session.default_rows == 0 {
            return Err(ConfigError::InvalidDimensions {
                cols: self.session.default_cols,
                rows: self.session.default_rows,
            });
        }

        self.listen_addr()?;

        if let Some(ref shell) = self.session.default_shell {
            if which::which(shell).is_err() {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        if let Some(ref dir) = self.session.working_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidWorkingDir(dir.display().to_string()));
            }
        }

        let level = self.relay.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.relay.log_level.clone()));
        }

        if self.relay.outbox_capacity == 0 {
            return Err(ConfigError::InvalidOutboxCapacity);
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
