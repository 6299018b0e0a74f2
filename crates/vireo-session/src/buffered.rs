// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One-shot buffered transport for server-side rendering.
//!
//! Sends accumulate in order; the HTTP handler drains them once when it
//! writes the response.

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde_json::Value;
use tracing::debug;

use crate::transport::{RequestInfo, Transport, TransportError};

/// One buffered send.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    /// Per-transport sequence (first is 1).
    pub seq: u64,
    /// Topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Payload.
    pub data: Value,
    /// When the send happened.
    pub at: SystemTime,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<BufferedMessage>,
    next_seq: u64,
    closed: bool,
}

/// Bounded in-memory transport.
#[derive(Debug)]
pub struct BufferedTransport {
    state: Mutex<State>,
    max: usize,
    info: RequestInfo,
}

impl BufferedTransport {
    /// Transport holding at most `max` messages.
    pub fn new(max: usize, info: RequestInfo) -> Self {
        Self {
            state: Mutex::new(State {
                next_seq: 1,
                ..State::default()
            }),
            max,
            info,
        }
    }

    /// Configured bound.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Buffered message count.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every buffered message, leaving the buffer empty.
    pub fn drain(&self) -> Vec<BufferedMessage> {
        std::mem::take(&mut self.lock().messages)
    }

    /// Buffered messages matching `topic` and `event` (`None` matches all).
    pub fn filter(&self, topic: Option<&str>, event: Option<&str>) -> Vec<BufferedMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|m| topic.is_none_or(|t| m.topic == t))
            .filter(|m| event.is_none_or(|e| m.event == e))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for BufferedTransport {
    fn send(&self, topic: &str, event: &str, data: &Value) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.messages.len() >= self.max {
            debug!(topic, event, max = self.max, "buffered transport full");
            return Err(TransportError::BufferLimitExceeded);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.messages.push(BufferedMessage {
            seq,
            topic: topic.to_string(),
            event: event.to_string(),
            data: data.clone(),
            at: SystemTime::now(),
        });
        Ok(())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn close(&self) -> Result<(), TransportError> {
        self.lock().closed = true;
        Ok(())
    }

    fn request_info(&self) -> RequestInfo {
        self.info.clone()
    }
}
