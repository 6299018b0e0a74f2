// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport capability shared by the buffered and live implementations.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Inbound request metadata captured when a transport is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request path.
    pub path: String,
    /// Raw query string.
    pub query: String,
    /// Selected request headers (lower-cased names).
    pub headers: BTreeMap<String, String>,
    /// Peer address, when known.
    pub remote_addr: Option<String>,
}

impl RequestInfo {
    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
            && self.query.is_empty()
            && self.headers.is_empty()
            && self.remote_addr.is_none()
    }
}

/// Send failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The buffered transport already holds its maximum.
    #[error("buffer limit exceeded")]
    BufferLimitExceeded,
    /// The outbound channel is full.
    #[error("outbound channel full")]
    Backpressure,
    /// The transport was closed or its connection went away.
    #[error("transport closed")]
    Closed,
}

/// Close `transport` on a teardown path, where a failure is only logged.
pub fn close_quietly(transport: &dyn Transport) {
    if let Err(err) = transport.close() {
        warn!(%err, "transport close failed");
    }
}

/// Delivery endpoint for client-bound events.
pub trait Transport: Send + Sync {
    /// Deliver one event.
    fn send(&self, topic: &str, event: &str, data: &Value) -> Result<(), TransportError>;

    /// Whether this is a persistent duplex connection.
    fn is_live(&self) -> bool;

    /// Stop accepting sends. Closing twice is not an error.
    fn close(&self) -> Result<(), TransportError>;

    /// Metadata of the request that created the transport.
    fn request_info(&self) -> RequestInfo;

    /// Record that the client received everything up to `seq`.
    fn ack_through(&self, _seq: u64) {}

    /// Highest acknowledged sequence.
    fn acked_seq(&self) -> u64 {
        0
    }
}
