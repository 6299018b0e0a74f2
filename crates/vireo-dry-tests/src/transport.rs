// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport double that records every send.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use vireo_session::transport::{RequestInfo, Transport, TransportError};

/// One recorded send.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    /// Topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Payload.
    pub data: Value,
}

#[derive(Debug, Default)]
struct State {
    sends: Vec<RecordedSend>,
    failure: Option<TransportError>,
    close_failure: Option<TransportError>,
    close_count: usize,
    acked: u64,
}

/// [`Transport`] that keeps every successful send and can be told to fail.
///
/// Sends after `close()` fail with [`TransportError::Closed`] like the real
/// transports do.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    state: Mutex<State>,
    live: bool,
    info: RequestInfo,
}

impl RecordingTransport {
    /// Buffered-style (not live) recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder reporting itself as live.
    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }

    /// Recorder returning `info` from `request_info()`.
    #[must_use]
    pub fn with_request_info(mut self, info: RequestInfo) -> Self {
        self.info = info;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every following send with `failure` (`None` to recover).
    pub fn set_failure(&self, failure: Option<TransportError>) {
        self.lock().failure = failure;
    }

    /// Report `failure` from every following `close()`. The close still
    /// counts and later sends still fail.
    pub fn set_close_failure(&self, failure: Option<TransportError>) {
        self.lock().close_failure = failure;
    }

    /// Successful sends so far.
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.lock().sends.clone()
    }

    /// Successful sends on `topic`.
    pub fn sends_on(&self, topic: &str) -> Vec<RecordedSend> {
        self.lock()
            .sends
            .iter()
            .filter(|s| s.topic == topic)
            .cloned()
            .collect()
    }

    /// Times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Whether `close()` was called at least once.
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

impl Transport for RecordingTransport {
    fn send(&self, topic: &str, event: &str, data: &Value) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.close_count > 0 {
            return Err(TransportError::Closed);
        }
        if let Some(failure) = state.failure.clone() {
            return Err(failure);
        }
        state.sends.push(RecordedSend {
            topic: topic.to_string(),
            event: event.to_string(),
            data: data.clone(),
        });
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.close_count += 1;
        state.close_failure.clone().map_or(Ok(()), Err)
    }

    fn request_info(&self) -> RequestInfo {
        self.info.clone()
    }

    fn ack_through(&self, seq: u64) {
        let mut state = self.lock();
        state.acked = state.acked.max(seq);
    }

    fn acked_seq(&self) -> u64 {
        self.lock().acked
    }
}
