// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bus topic and event names shared by sessions and transports.

/// Patch frames (`patch` event).
pub const FRAME: &str = "frame";
/// Navigation commands (`navigate` event).
pub const ROUTER: &str = "router";
/// DOM actions addressed to a ref.
pub const DOM: &str = "dom";
/// Acknowledgement channel.
pub const ACK: &str = "ack";
/// Messages for element scripts.
pub const SCRIPT: &str = "script";
/// Session lifecycle and send failures (`error` event).
pub const SESSION: &str = "session";
/// Out-of-band error reports.
pub const DIAGNOSTIC: &str = "diagnostic";
/// Inbound client events, consumed by the session's view.
pub const CLIENT: &str = "client";
/// Client event topic for handler invocations.
pub const HANDLER: &str = "handler";

/// Event names used with the topics above.
pub mod event {
    /// Patch list on [`super::FRAME`].
    pub const PATCH: &str = "patch";
    /// Path change on [`super::ROUTER`].
    pub const NAVIGATE: &str = "navigate";
    /// Send failure on [`super::SESSION`].
    pub const ERROR: &str = "error";
    /// Diagnostic on [`super::DIAGNOSTIC`].
    pub const REPORT: &str = "report";
    /// Script message on [`super::SCRIPT`].
    pub const SEND: &str = "send";
}

const CLIENT_BOUND: [&str; 5] = [FRAME, ROUTER, DOM, ACK, SCRIPT];

/// Whether events on `topic` are forwarded to the bound transport.
pub fn is_client_bound(topic: &str) -> bool {
    CLIENT_BOUND.contains(&topic)
}
