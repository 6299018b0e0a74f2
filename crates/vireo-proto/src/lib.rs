// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema for Vireo live views.
//!
//! Server → client traffic is a [`ServerMessage`] (boot, steady-state events,
//! errors); client → server traffic is a [`ClientMessage`] (events, acks).
//! Both travel as JSON text frames tagged by `t` (see [`wire`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vireo_tree::Patch;

pub mod topic;
pub mod wire;

/// Wire protocol version reported in [`Boot::ver`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Session identifier (opaque string, UUID v4 in practice).
pub type SessionId = String;

/// Browser location at boot time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// Path component, e.g. `/items`.
    pub path: String,
    /// Raw query string without the leading `?`.
    #[serde(default)]
    pub query: String,
    /// Fragment without the leading `#`.
    #[serde(default)]
    pub hash: String,
}

impl Location {
    /// Location with only a path.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Client-side settings delivered at boot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Enables client debug logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

/// First message of every session (`{t:"boot"}`).
///
/// `patch` is the metadata-only extraction of the initial tree (refs,
/// handlers, scripts), not a structural diff: structure arrives as markup.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Boot {
    /// Session id the client must echo on reconnect and acks.
    pub sid: SessionId,
    /// Protocol version.
    pub ver: u32,
    /// Highest sequence already acknowledged on the bound transport.
    pub seq: u64,
    /// Metadata patches for the initial tree.
    pub patch: Vec<Patch>,
    /// Location the session booted at.
    pub location: Location,
    /// Client settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,
}

/// Steady-state push (`{t:"evt"}`): patches, navigation, DOM actions,
/// script messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEvt {
    /// Client-bound topic (see [`topic`]).
    pub topic: String,
    /// Action within the topic.
    pub action: String,
    /// Action payload.
    pub payload: Value,
    /// Transport sequence number (first is 1).
    pub seq: u64,
}

/// Error reported to the client (`{t:"error"}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessage {
    /// Session the error belongs to (empty when unknown).
    pub sid: SessionId,
    /// Stable machine-readable code, e.g. `session_not_found`.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Captured backtrace or panic location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Extra structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, Value>>,
}

/// Server → client frame.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "t")]
pub enum ServerMessage {
    /// Session start.
    #[serde(rename = "boot")]
    Boot(Boot),
    /// Steady-state event.
    #[serde(rename = "evt")]
    Evt(ServerEvt),
    /// Error report.
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

/// Inbound client event (`{t:"evt"}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientEvt {
    /// Topic the event is addressed to, e.g. `handler`.
    pub topic: String,
    /// Action within the topic (the handler name for `handler` events).
    pub action: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

impl ClientEvt {
    /// Event with an explicit payload.
    pub fn new(topic: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            action: action.into(),
            payload,
        }
    }

    /// Handler invocation, as sent by a bound DOM event.
    pub fn handler(name: impl Into<String>, payload: Value) -> Self {
        Self::new(topic::HANDLER, name, payload)
    }
}

/// Inbound acknowledgement (`{t:"ack"}`): every event up to `seq` arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientAck {
    /// Session id.
    #[serde(default)]
    pub sid: SessionId,
    /// Highest sequence received.
    pub seq: u64,
}

/// Client → server frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t")]
pub enum ClientMessage {
    /// Event for the session.
    #[serde(rename = "evt")]
    Evt(ClientEvt),
    /// Acknowledgement.
    #[serde(rename = "ack")]
    Ack(ClientAck),
}

/// Out-of-band error report, published on the [`topic::DIAGNOSTIC`] topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    /// Where the failure happened, e.g. `bus`, `flush`, `observer`.
    pub phase: String,
    /// What happened.
    pub message: String,
    /// Panic location or backtrace, when one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Diagnostic {
    /// Diagnostic for `phase` with `message`.
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack_trace = Some(stack.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Bus payload form.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a bus payload back into a diagnostic.
    pub fn from_payload(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Client-facing error message for session `sid`.
    pub fn to_error(&self, sid: impl Into<SessionId>, code: impl Into<String>) -> ErrorMessage {
        ErrorMessage {
            sid: sid.into(),
            code: code.into(),
            message: format!("{}: {}", self.phase, self.message),
            stack: self.stack_trace.clone(),
            meta: (!self.metadata.is_empty()).then(|| self.metadata.clone()),
        }
    }
}
