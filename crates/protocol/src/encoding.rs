//! Payload encodings for terminal data carried inside JSON messages.
//!
//! JSON strings cannot carry arbitrary bytes, so every `data` field declares
//! how its bytes are represented. `utf8` is the default and what a browser
//! terminal expects; `base64` carries raw bytes losslessly.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Unicode replacement character emitted for invalid UTF-8 sequences.
const REPLACEMENT: char = '\u{FFFD}';

/// Representation of terminal bytes inside a `data` string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    /// The string's own UTF-8 bytes.
    #[default]
    Utf8,
    /// Standard base64 with padding.
    Base64,
}

impl DataEncoding {
    /// Returns true for the default encoding (used to omit the field on the wire).
    pub fn is_utf8(&self) -> bool {
        matches!(self, DataEncoding::Utf8)
    }

    /// Decodes an inbound `data` string into the bytes it represents.
    pub fn decode(&self, data: &str) -> Result<Vec<u8>> {
        match self {
            DataEncoding::Utf8 => Ok(data.as_bytes().to_vec()),
            DataEncoding::Base64 => Ok(STANDARD.decode(data)?),
        }
    }

    /// Encodes bytes as a `data` string. UTF-8 encoding is lossy here; use
    /// [`OutputEncoder`] for streams that may split characters across chunks.
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            DataEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            DataEncoding::Base64 => STANDARD.encode(bytes),
        }
    }
}

/// Stateful encoder for one session's output stream.
///
/// Read boundaries on a pseudo-terminal are arbitrary, so a multi-byte
/// character can arrive split across two chunks. In UTF-8 mode the encoder
/// holds an incomplete trailing sequence back until the next chunk completes
/// it; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct OutputEncoder {
    encoding: DataEncoding,
    pending: Vec<u8>,
}

impl OutputEncoder {
    /// Creates an encoder for the given encoding.
    pub fn new(encoding: DataEncoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
        }
    }

    /// Returns the encoding this encoder produces.
    pub fn encoding(&self) -> DataEncoding {
        self.encoding
    }

    /// Returns the number of bytes held back waiting for a character to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encodes one output chunk.
    ///
    /// Returns `None` when there is nothing to send yet (empty chunk, or a
    /// chunk consisting only of the start of a multi-byte character).
    pub fn encode(&mut self, chunk: &[u8]) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }

        match self.encoding {
            DataEncoding::Base64 => Some(STANDARD.encode(chunk)),
            DataEncoding::Utf8 => {
                self.pending.extend_from_slice(chunk);
                let text = decode_complete(&mut self.pending);
                (!text.is_empty()).then_some(text)
            }
        }
    }

    /// Flushes any held-back bytes, lossily. Called once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(self.encoding.encode(&tail))
    }
}

/// Decodes every complete sequence in `buffer`, leaving an incomplete
/// trailing sequence (at most 3 bytes) in place.
fn decode_complete(buffer: &mut Vec<u8>) -> String {
    let mut text = String::with_capacity(buffer.len());
    let mut input: &[u8] = buffer;

    loop {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                text.push_str(valid);
                input = &[];
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&input[..valid_up_to]));
                match e.error_len() {
                    Some(invalid_len) => {
                        text.push(REPLACEMENT);
                        input = &input[valid_up_to + invalid_len..];
                    }
                    None => {
                        input = &input[valid_up_to..];
                        break;
                    }
                }
            }
        }
    }

    let tail = input.to_vec();
    *buffer = tail;
    text
}
