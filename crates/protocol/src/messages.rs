//! Wire message definitions for the PtyRelay channel.
//!
//! Every frame is a single JSON object whose `type` field selects the
//! message. One channel may drive several sessions at once, so every
//! session-scoped message carries the session `id` the relay assigned in
//! `ready`.

use serde::{Deserialize, Serialize};

use crate::encoding::DataEncoding;
use crate::error::Result;

/// Messages sent by an endpoint to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Request a new shell session.
    Start {
        /// Requested terminal columns (defaulted when missing or zero).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        /// Requested terminal rows (defaulted when missing or zero).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
        /// Encoding used for this session's `output` messages.
        #[serde(default, skip_serializing_if = "DataEncoding::is_utf8")]
        encoding: DataEncoding,
    },

    /// Bytes for the process's standard input.
    Input {
        /// Target session.
        id: String,
        /// Payload, represented according to `encoding`.
        data: String,
        /// Representation of `data`.
        #[serde(default, skip_serializing_if = "DataEncoding::is_utf8")]
        encoding: DataEncoding,
    },

    /// Terminal window size change.
    Resize {
        /// Target session.
        id: String,
        /// New column count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        /// New row count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },

    /// Explicit termination request.
    Close {
        /// Target session.
        id: String,
    },
}

impl ClientMessage {
    /// Parses a frame received from an endpoint.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serializes the message to a JSON frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the session this message addresses, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Start { .. } => None,
            ClientMessage::Input { id, .. }
            | ClientMessage::Resize { id, .. }
            | ClientMessage::Close { id } => Some(id),
        }
    }
}

/// Messages sent by the relay to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A session was created and its shell is running.
    Ready {
        /// Identifier for all further messages about this session.
        id: String,
        /// Process ID of the shell, when the platform reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },

    /// Bytes produced by the process.
    Output {
        /// Source session.
        id: String,
        /// Payload, represented according to `encoding`.
        data: String,
        /// Representation of `data`.
        #[serde(default, skip_serializing_if = "DataEncoding::is_utf8")]
        encoding: DataEncoding,
    },

    /// The process terminated. Always the last message for a session.
    Exit {
        /// Source session.
        id: String,
        /// Exit code, when available.
        code: Option<i32>,
    },

    /// A request was malformed or could not be carried out.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Builds an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Parses a frame received from the relay.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serializes the message to a JSON frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the session this message is about, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Ready { id, .. }
            | ServerMessage::Output { id, .. }
            | ServerMessage::Exit { id, .. } => Some(id),
            ServerMessage::Error { .. } => None,
        }
    }
}
