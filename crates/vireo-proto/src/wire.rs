// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON text framing.
//!
//! Each websocket text frame carries exactly one message object tagged by
//! `t`. Frames larger than the configured maximum are rejected in both
//! directions before (de)serialization work is wasted on them.

use thiserror::Error;

use crate::{ClientMessage, ServerMessage};

/// Default upper bound on one encoded frame (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// Framing failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame exceeds the size limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame size.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a server message as one text frame.
pub fn encode_server(msg: &ServerMessage, max: usize) -> Result<String, WireError> {
    let text = serde_json::to_string(msg)?;
    if text.len() > max {
        return Err(WireError::FrameTooLarge {
            len: text.len(),
            max,
        });
    }
    Ok(text)
}

/// Decode one client text frame.
pub fn decode_client(text: &str, max: usize) -> Result<ClientMessage, WireError> {
    if text.len() > max {
        return Err(WireError::FrameTooLarge {
            len: text.len(),
            max,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a client message (used by tests and tooling that drive a session).
pub fn encode_client(msg: &ClientMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(msg)?)
}
