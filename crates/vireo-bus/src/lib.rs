// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topic-keyed in-process event bus.
//!
//! Two subscription disciplines share one topic map:
//!
//! * [`Bus::subscribe`] appends a fan-out handler; every handler on the topic
//!   runs on each publish.
//! * [`Bus::upsert`] leaves exactly one handler on the topic, replacing any
//!   earlier registrations (fan-out ones included).
//!
//! [`Bus::subscribe_all`] handlers see every publish. Delivery is synchronous
//! and happens outside the registration lock, so handlers may publish or
//! (un)subscribe re-entrantly. Each handler runs under `catch_unwind`: a
//! panic is logged, reported on the [`topic::DIAGNOSTIC`] topic, and never
//! reaches sibling handlers or the publisher.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{error, trace};
use vireo_proto::{topic, Diagnostic};

/// One published event as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Topic it was published on.
    pub topic: String,
    /// Event name within the topic.
    pub event: String,
    /// Payload.
    pub data: Value,
}

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle for removing one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<Registration>>,
    wildcard: Vec<Registration>,
}

/// Event bus. One per owner; there is no process-wide instance.
#[derive(Default)]
pub struct Bus {
    inner: RwLock<Registry>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Bus")
            .field("topics", &reg.topics.len())
            .field("wildcard", &reg.wildcard.len())
            .finish()
    }
}

impl Bus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a fan-out handler on `topic`.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.alloc_id();
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        reg.topics.entry(topic.to_string()).or_default().push(Registration {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Make `handler` the only handler on `topic`.
    pub fn upsert<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.alloc_id();
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        reg.topics.insert(
            topic.to_string(),
            vec![Registration {
                id,
                handler: Arc::new(handler),
            }],
        );
        id
    }

    /// Receive every publish on every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.alloc_id();
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        reg.wildcard.push(Registration {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove one registration. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = reg.wildcard.iter().position(|r| r.id == id) {
            reg.wildcard.remove(pos);
            return true;
        }
        let mut emptied = None;
        let mut found = false;
        for (topic, regs) in &mut reg.topics {
            if let Some(pos) = regs.iter().position(|r| r.id == id) {
                regs.remove(pos);
                found = true;
                if regs.is_empty() {
                    emptied = Some(topic.clone());
                }
                break;
            }
        }
        if let Some(topic) = emptied {
            reg.topics.remove(&topic);
        }
        found
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        reg.topics.clear();
        reg.wildcard.clear();
    }

    /// Handlers registered on `topic` (wildcards excluded).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        reg.topics.get(topic).map_or(0, Vec::len)
    }

    /// Wildcard handlers.
    pub fn wildcard_count(&self) -> usize {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        reg.wildcard.len()
    }

    /// Deliver an event to the topic's handlers, then to wildcard handlers.
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, topic: &str, event: &str, data: Value) -> usize {
        let handlers: Vec<Handler> = {
            let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            reg.topics
                .get(topic)
                .into_iter()
                .flatten()
                .chain(&reg.wildcard)
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };
        trace!(topic, event, handlers = handlers.len(), "publish");

        let ev = Event {
            topic: topic.to_string(),
            event: event.to_string(),
            data,
        };
        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&ev))) {
                Ok(()) => completed += 1,
                Err(payload) => self.report_panic(&ev, payload.as_ref()),
            }
        }
        completed
    }

    fn report_panic(&self, ev: &Event, payload: &(dyn Any + Send)) {
        let message = panic_message(payload);
        error!(topic = %ev.topic, event = %ev.event, panic = %message, "bus subscriber panicked");
        if ev.topic == topic::DIAGNOSTIC {
            return;
        }
        let diag = Diagnostic::new("bus", format!("subscriber panicked: {message}"))
            .with_meta("topic", ev.topic.clone())
            .with_meta("event", ev.event.clone());
        self.publish(topic::DIAGNOSTIC, topic::event::REPORT, diag.to_payload());
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
