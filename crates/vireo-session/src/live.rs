// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live transport over a persistent duplex connection.
//!
//! Sends become [`ServerEvt`]s pushed onto a bounded channel drained by the
//! connection's writer task. Every event gets the next sequence number and
//! stays pending until the client acknowledges it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use vireo_proto::ServerEvt;

use crate::transport::{RequestInfo, Transport, TransportError};

#[derive(Debug)]
struct Inner {
    sender: Option<mpsc::Sender<ServerEvt>>,
    last_seq: u64,
    pending: VecDeque<ServerEvt>,
}

/// Transport bound to one live connection.
#[derive(Debug)]
pub struct LiveTransport {
    inner: Mutex<Inner>,
    acked: AtomicU64,
    pending_limit: usize,
    info: RequestInfo,
}

impl LiveTransport {
    /// Transport writing into `sender`, keeping at most `pending_limit`
    /// unacknowledged events for resend.
    pub fn new(sender: mpsc::Sender<ServerEvt>, pending_limit: usize, info: RequestInfo) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sender: Some(sender),
                last_seq: 0,
                pending: VecDeque::new(),
            }),
            acked: AtomicU64::new(0),
            pending_limit,
            info,
        }
    }

    /// Transport plus the receiving half for the connection writer.
    pub fn channel(
        capacity: usize,
        pending_limit: usize,
        info: RequestInfo,
    ) -> (Self, mpsc::Receiver<ServerEvt>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, pending_limit, info), rx)
    }

    /// Sequence of the most recent send (0 before the first).
    pub fn last_seq(&self) -> u64 {
        self.lock().last_seq
    }

    /// Events sent but not yet acknowledged, oldest first.
    pub fn unacked(&self) -> Vec<ServerEvt> {
        self.lock().pending.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LiveTransport {
    fn send(&self, topic: &str, event: &str, data: &Value) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let Some(sender) = inner.sender.as_ref() else {
            return Err(TransportError::Closed);
        };
        let evt = ServerEvt {
            topic: topic.to_string(),
            action: event.to_string(),
            payload: data.clone(),
            seq: inner.last_seq + 1,
        };
        match sender.try_send(evt.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(topic, event, "live transport backpressure");
                return Err(TransportError::Backpressure);
            }
            Err(TrySendError::Closed(_)) => {
                inner.sender = None;
                return Err(TransportError::Closed);
            }
        }
        trace!(topic, event, seq = evt.seq, "live send");
        inner.last_seq = evt.seq;
        inner.pending.push_back(evt);
        while inner.pending.len() > self.pending_limit {
            inner.pending.pop_front();
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        true
    }

    fn close(&self) -> Result<(), TransportError> {
        self.lock().sender = None;
        Ok(())
    }

    fn request_info(&self) -> RequestInfo {
        self.info.clone()
    }

    fn ack_through(&self, seq: u64) {
        let mut inner = self.lock();
        let clamped = seq.min(inner.last_seq);
        let acked = self.acked.fetch_max(clamped, Ordering::AcqRel).max(clamped);
        while inner.pending.front().is_some_and(|e| e.seq <= acked) {
            inner.pending.pop_front();
        }
    }

    fn acked_seq(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sends_are_sequenced_from_one() {
        let (t, mut rx) = LiveTransport::channel(8, 8, RequestInfo::default());
        t.send("frame", "patch", &json!([])).unwrap();
        t.send("router", "navigate", &json!({"path": "/a"})).unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(second.action, "navigate");
        assert_eq!(t.last_seq(), 2);
    }

    #[test]
    fn acks_are_monotonic_clamped_and_prune_pending() {
        let (t, _rx) = LiveTransport::channel(8, 8, RequestInfo::default());
        for i in 0..4 {
            t.send("frame", "patch", &json!(i)).unwrap();
        }
        t.ack_through(2);
        assert_eq!(t.acked_seq(), 2);
        assert_eq!(t.unacked().iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4]);
        t.ack_through(1);
        assert_eq!(t.acked_seq(), 2);
        t.ack_through(99);
        assert_eq!(t.acked_seq(), 4);
        assert!(t.unacked().is_empty());
    }

    #[test]
    fn pending_is_bounded() {
        let (t, _rx) = LiveTransport::channel(16, 2, RequestInfo::default());
        for i in 0..5 {
            t.send("frame", "patch", &json!(i)).unwrap();
        }
        assert_eq!(t.unacked().iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn full_channel_is_backpressure_and_keeps_sequence() {
        let (t, _rx) = LiveTransport::channel(1, 8, RequestInfo::default());
        t.send("frame", "patch", &json!(1)).unwrap();
        assert_eq!(
            t.send("frame", "patch", &json!(2)),
            Err(TransportError::Backpressure)
        );
        assert_eq!(t.last_seq(), 1);
    }

    #[test]
    fn closed_or_dropped_connection_rejects_sends() {
        let (t, rx) = LiveTransport::channel(4, 4, RequestInfo::default());
        drop(rx);
        assert_eq!(t.send("frame", "patch", &Value::Null), Err(TransportError::Closed));

        let (t, _rx) = LiveTransport::channel(4, 4, RequestInfo::default());
        t.close().unwrap();
        assert_eq!(t.send("frame", "patch", &Value::Null), Err(TransportError::Closed));
        assert!(t.is_live());
    }
}
