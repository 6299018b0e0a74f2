// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One client's live view: render state, bus wiring and the bound transport.
//!
//! A session owns its own [`Bus`]. Two subscriptions are installed at
//! construction:
//!
//! * a wildcard forwarder that hands client-bound topics to whichever
//!   transport is bound at that moment (the slot is re-read per send);
//! * the single `client` handler that feeds inbound events to the view and
//!   flushes.
//!
//! Renders, diffs and the resulting frame publish all happen under the
//! render mutex, so frames leave in the order they were computed. Frame
//! subscribers must not call back into the session's render path.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vireo_bus::{panic_message, Bus, Event};
use vireo_proto::{topic, Boot, ClientConfig, ClientEvt, Diagnostic, Location, PROTOCOL_VERSION};
use vireo_tree::{flatten, metadata_patches, DiffError, Differ, DuplicateKeyPolicy, Node};

use crate::transport::{close_quietly, RequestInfo, Transport};

/// The authoring layer's render instance.
pub trait View: Send {
    /// Produce the current tree.
    fn render(&mut self) -> Node;

    /// React to an inbound client event before the next render.
    fn handle_event(&mut self, _evt: &ClientEvt) {}
}

impl<F> View for F
where
    F: FnMut() -> Node + Send,
{
    fn render(&mut self) -> Node {
        self()
    }
}

/// Session failures surfaced to callers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The differ aborted (duplicate keys under the abort policy).
    #[error(transparent)]
    Diff(#[from] DiffError),
    /// A handler invocation named a handler absent from the current tree.
    #[error("unknown handler {0:?}")]
    UnknownHandler(String),
    /// A DOM action named a ref absent from the current tree.
    #[error("unknown ref {0:?}")]
    UnknownRef(String),
    /// The view panicked while rendering.
    #[error("render panicked: {0}")]
    RenderPanicked(String),
    /// The session was closed.
    #[error("session closed")]
    Closed,
}

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Inactivity after which [`Session::is_idle`] reports true.
    pub idle_timeout: Option<Duration>,
    /// What the differ does with duplicate sibling keys.
    pub duplicate_keys: DuplicateKeyPolicy,
}

/// Handle returned by [`Session::on_touch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Activity callback; receives the session id.
pub type TouchObserver = Arc<dyn Fn(&str) + Send + Sync>;

type TransportSlot = Arc<RwLock<Option<Arc<dyn Transport>>>>;

struct RenderState {
    view: Box<dyn View>,
    snapshot: Option<Node>,
    handlers: HashSet<String>,
    refs: HashSet<String>,
}

impl RenderState {
    fn reindex(&mut self) {
        self.handlers.clear();
        self.refs.clear();
        if let Some(tree) = &self.snapshot {
            index_tree(tree, &mut self.handlers, &mut self.refs);
        }
    }
}

fn index_tree(node: &Node, handlers: &mut HashSet<String>, refs: &mut HashSet<String>) {
    if let Node::Element(el) = node {
        handlers.extend(el.handlers.iter().map(|h| h.handler.clone()));
        if let Some(id) = &el.ref_id {
            refs.insert(id.clone());
        }
    }
    for child in node.children().unwrap_or_default() {
        index_tree(child, handlers, refs);
    }
}

/// A live view session.
pub struct Session {
    id: String,
    bus: Arc<Bus>,
    differ: Differ,
    idle_timeout: Option<Duration>,
    render: Mutex<RenderState>,
    transport: TransportSlot,
    request_info: Mutex<RequestInfo>,
    last_active: Mutex<Instant>,
    observers: Mutex<HashMap<ObserverId, TouchObserver>>,
    next_observer: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Fresh random session id.
    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Create a session around `view` and wire its bus.
    pub fn new(id: impl Into<String>, view: impl View + 'static, config: SessionConfig) -> Arc<Self> {
        let id = id.into();
        let bus = Arc::new(Bus::new());
        let transport: TransportSlot = Arc::default();

        install_forwarder(&bus, Arc::clone(&transport));

        Arc::new_cyclic(|weak: &Weak<Session>| {
            let weak = weak.clone();
            bus.upsert(topic::CLIENT, move |ev: &Event| {
                if let Some(session) = weak.upgrade() {
                    session.dispatch(ev);
                }
            });
            Session {
                id,
                bus,
                differ: Differ::new(config.duplicate_keys),
                idle_timeout: config.idle_timeout,
                render: Mutex::new(RenderState {
                    view: Box::new(view),
                    snapshot: None,
                    handlers: HashSet::new(),
                    refs: HashSet::new(),
                }),
                transport,
                request_info: Mutex::new(RequestInfo::default()),
                last_active: Mutex::new(Instant::now()),
                observers: Mutex::new(HashMap::new()),
                next_observer: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }
        })
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session's bus.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Whether [`Session::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_render(&self) -> MutexGuard<'_, RenderState> {
        self.render.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last rendered (flattened) tree.
    pub fn snapshot(&self) -> Option<Node> {
        self.lock_render().snapshot.clone()
    }

    /// Render the first tree without emitting patches; later calls return
    /// the current snapshot.
    pub fn render_initial(&self) -> Result<Node, SessionError> {
        let mut state = self.lock_render();
        if let Some(tree) = &state.snapshot {
            return Ok(tree.clone());
        }
        let tree = flatten(&self.render_view(&mut state)?);
        state.snapshot = Some(tree.clone());
        state.reindex();
        Ok(tree)
    }

    /// Boot message for a client connecting at `location`.
    pub fn boot(&self, location: Location, client: Option<ClientConfig>) -> Result<Boot, SessionError> {
        let tree = self.render_initial()?;
        let seq = self.transport().map_or(0, |t| t.acked_seq());
        Ok(Boot {
            sid: self.id.clone(),
            ver: PROTOCOL_VERSION,
            seq,
            patch: metadata_patches(&tree),
            location,
            client,
        })
    }

    /// Re-render, diff against the last snapshot and publish the patches on
    /// the frame topic. Returns how many patches were produced.
    pub fn flush(&self) -> Result<usize, SessionError> {
        let mut state = self.lock_render();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut RenderState) -> Result<usize, SessionError> {
        let next = flatten(&self.render_view(state)?);
        let patches = match self.differ.diff(state.snapshot.as_ref(), Some(&next)) {
            Ok(patches) => patches,
            Err(err) => {
                self.report(Diagnostic::new("flush", err.to_string()).with_meta("sid", self.id.clone()));
                return Err(err.into());
            }
        };
        state.snapshot = Some(next);
        state.reindex();
        if patches.is_empty() {
            return Ok(0);
        }
        match serde_json::to_value(&patches) {
            Ok(payload) => {
                debug!(sid = %self.id, patches = patches.len(), "frame");
                self.bus.publish(topic::FRAME, topic::event::PATCH, payload);
            }
            Err(err) => {
                self.report(Diagnostic::new("flush", format!("encode patches: {err}")));
            }
        }
        Ok(patches.len())
    }

    fn render_view(&self, state: &mut RenderState) -> Result<Node, SessionError> {
        catch_unwind(AssertUnwindSafe(|| state.view.render())).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            error!(sid = %self.id, panic = %message, "view panicked during render");
            self.report(Diagnostic::new("render", message.clone()).with_meta("sid", self.id.clone()));
            SessionError::RenderPanicked(message)
        })
    }

    // Bus-side half of `receive`: runs the view's event hook and flushes.
    fn dispatch(&self, ev: &Event) {
        let evt = client_evt_from(ev);
        let mut state = self.lock_render();
        let handled = catch_unwind(AssertUnwindSafe(|| state.view.handle_event(&evt)));
        if let Err(payload) = handled {
            let message = panic_message(payload.as_ref());
            error!(sid = %self.id, panic = %message, "view panicked handling an event");
            self.report(
                Diagnostic::new("handle_event", message)
                    .with_meta("sid", self.id.clone())
                    .with_meta("action", evt.action.clone()),
            );
            return;
        }
        if let Err(err) = self.flush_locked(&mut state) {
            debug!(sid = %self.id, %err, "flush after client event failed");
        }
    }

    /// Accept one inbound client event.
    ///
    /// Handler invocations (`topic == "handler"`) must name a handler bound
    /// in the current tree.
    pub fn receive(&self, evt: ClientEvt) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.touch();
        if evt.topic == topic::HANDLER && !self.lock_render().handlers.contains(&evt.action) {
            self.report(
                Diagnostic::new("receive", format!("unknown handler {:?}", evt.action))
                    .with_meta("sid", self.id.clone()),
            );
            return Err(SessionError::UnknownHandler(evt.action));
        }
        let action = evt.action.clone();
        self.bus.publish(topic::CLIENT, &action, client_payload(evt));
        Ok(())
    }

    /// Ask the client to navigate to `path`.
    pub fn navigate(&self, path: &str) -> Result<(), SessionError> {
        self.push(topic::ROUTER, topic::event::NAVIGATE, json!({ "path": path }))
    }

    /// Run `action` on the element carrying `ref_id`.
    pub fn dom_action(&self, ref_id: &str, action: &str, args: Value) -> Result<(), SessionError> {
        if !self.lock_render().refs.contains(ref_id) {
            return Err(SessionError::UnknownRef(ref_id.to_string()));
        }
        self.push(topic::DOM, action, json!({ "ref": ref_id, "args": args }))
    }

    /// Send `data` to the element script `script_id`.
    pub fn script_send(&self, script_id: &str, data: Value) -> Result<(), SessionError> {
        self.push(topic::SCRIPT, topic::event::SEND, json!({ "id": script_id, "data": data }))
    }

    fn push(&self, topic: &str, event: &str, data: Value) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.bus.publish(topic, event, data);
        Ok(())
    }

    /// Publish a diagnostic on the session bus.
    pub fn report(&self, diag: Diagnostic) {
        warn!(sid = %self.id, phase = %diag.phase, message = %diag.message, "diagnostic");
        self.bus
            .publish(topic::DIAGNOSTIC, topic::event::REPORT, diag.to_payload());
    }

    /// Currently bound transport.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request metadata carried across transport swaps.
    pub fn request_info(&self) -> RequestInfo {
        self.request_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bind `next` (or unbind with `None`), closing the previous transport
    /// after the swap.
    pub fn set_transport(&self, next: Option<Arc<dyn Transport>>) {
        let previous = self.swap_transport(next.clone());
        if let Some(prev) = previous {
            let same = next.as_ref().is_some_and(|n| Arc::ptr_eq(n, &prev));
            if !same {
                close_quietly(prev.as_ref());
            }
        }
    }

    /// Bind `next` (or unbind with `None`) and hand back the previous
    /// transport without closing it. The caller owns its teardown.
    pub fn swap_transport(&self, next: Option<Arc<dyn Transport>>) -> Option<Arc<dyn Transport>> {
        let mut slot = self.transport.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = &next {
            let info = t.request_info();
            if !info.is_empty() {
                *self.request_info.lock().unwrap_or_else(PoisonError::into_inner) = info;
            }
        }
        std::mem::replace(&mut *slot, next)
    }

    /// Clear the slot if it still holds `transport`, without closing it.
    /// Returns whether it did.
    pub fn unbind_transport(&self, transport: &Arc<dyn Transport>) -> bool {
        let mut slot = self.transport.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, transport)) {
            *slot = None;
            return true;
        }
        false
    }

    /// Record activity and notify touch observers.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        let observers: Vec<TouchObserver> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for observer in observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(&self.id))) {
                let message = panic_message(payload.as_ref());
                error!(sid = %self.id, panic = %message, "touch observer panicked");
                self.report(Diagnostic::new("observer", message).with_meta("sid", self.id.clone()));
            }
        }
    }

    /// Register an activity observer.
    pub fn on_touch<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(observer));
        id
    }

    /// Remove an activity observer.
    pub fn remove_touch_observer(&self, id: ObserverId) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Time of the last [`Session::touch`].
    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the idle timeout elapsed at `now`.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.last_active()) >= timeout)
    }

    /// Unbind and close the transport and drop every bus subscription.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_transport(None);
        self.bus.clear();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!(sid = %self.id, "session closed");
    }
}

fn install_forwarder(bus: &Arc<Bus>, slot: TransportSlot) {
    let weak_bus = Arc::downgrade(bus);
    bus.subscribe_all(move |ev: &Event| {
        if !topic::is_client_bound(&ev.topic) {
            return;
        }
        let current = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(transport) = current else {
            return;
        };
        if let Err(err) = transport.send(&ev.topic, &ev.event, &ev.data) {
            warn!(topic = %ev.topic, event = %ev.event, %err, "transport send failed");
            if let Some(bus) = weak_bus.upgrade() {
                bus.publish(
                    topic::SESSION,
                    topic::event::ERROR,
                    json!({ "topic": ev.topic, "event": ev.event, "error": err.to_string() }),
                );
            }
        }
    });
}

fn client_payload(evt: ClientEvt) -> Value {
    json!({ "topic": evt.topic, "action": evt.action, "payload": evt.payload })
}

fn client_evt_from(ev: &Event) -> ClientEvt {
    let field = |name: &str| ev.data.get(name).and_then(Value::as_str).map(str::to_string);
    ClientEvt {
        topic: field("topic").unwrap_or_default(),
        action: field("action").unwrap_or_else(|| ev.event.clone()),
        payload: ev.data.get("payload").cloned().unwrap_or(Value::Null),
    }
}
