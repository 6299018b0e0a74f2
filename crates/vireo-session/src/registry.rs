// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server-wide session registry with TTL eviction.
//!
//! Both indexes (sessions by id, session ids by connection) live under one
//! `RwLock` so they never disagree. Every transport or session `close()`
//! happens after that lock is released.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::session::{ObserverId, Session};
use crate::transport::{close_quietly, Transport};
use crate::ttl::{MemoryTtlStore, TtlStore};

/// Registry lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No session with that id was put (or it was removed).
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The connection id is not bound to any session.
    #[error("missing connection: {0}")]
    MissingConnection(String),
    /// The connection's session has no transport bound.
    #[error("missing transport for connection: {0}")]
    MissingTransport(String),
}

struct Entry {
    session: Arc<Session>,
    transport: Option<Arc<dyn Transport>>,
    conn_id: Option<String>,
    observer: Option<ObserverId>,
}

#[derive(Default)]
struct Maps {
    sessions: HashMap<String, Entry>,
    connections: HashMap<String, String>,
}

/// Everything detached under the lock, released once it is dropped.
#[derive(Default)]
struct Evicted {
    transports: Vec<Arc<dyn Transport>>,
    observers: Vec<(Arc<Session>, ObserverId)>,
    sessions: Vec<Arc<Session>>,
}

impl Evicted {
    fn evict(&mut self, transport: Arc<dyn Transport>) {
        if !self.transports.iter().any(|t| Arc::ptr_eq(t, &transport)) {
            self.transports.push(transport);
        }
    }

    fn release(self) {
        for (session, id) in self.observers {
            session.remove_touch_observer(id);
        }
        for transport in self.transports {
            close_quietly(transport.as_ref());
        }
        for session in self.sessions {
            session.close();
        }
    }
}

/// Sessions of one server. Passed explicitly; there is no global instance.
pub struct Registry {
    maps: RwLock<Maps>,
    ttl_store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Registry refreshing `ttl` records in `ttl_store` on session activity.
    pub fn new(ttl_store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self {
            maps: RwLock::default(),
            ttl_store,
            ttl,
        }
    }

    /// Registry backed by a [`MemoryTtlStore`].
    pub fn with_memory_ttl(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryTtlStore::new()), ttl)
    }

    /// Session time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn install_observer(&self, session: &Session) -> ObserverId {
        let store = Arc::clone(&self.ttl_store);
        let ttl = self.ttl;
        session.on_touch(move |sid| store.touch(sid, ttl))
    }

    /// Register `session`, replacing (and closing) any session with the
    /// same id.
    pub fn put(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        let observer = self.install_observer(&session);
        let mut evicted = Evicted::default();
        {
            let mut maps = self.write();
            let previous = maps.sessions.insert(
                id.clone(),
                Entry {
                    session: Arc::clone(&session),
                    transport: None,
                    conn_id: None,
                    observer: Some(observer),
                },
            );
            if let Some(prev) = previous {
                if let Some(conn) = &prev.conn_id {
                    maps.connections.remove(conn);
                }
                if let Some(obs) = prev.observer {
                    evicted.observers.push((Arc::clone(&prev.session), obs));
                }
                if Arc::ptr_eq(&prev.session, &session) {
                    if let Some(t) = prev.transport {
                        session.unbind_transport(&t);
                        evicted.evict(t);
                    }
                } else {
                    evicted.sessions.push(prev.session);
                }
            }
        }
        evicted.release();
        self.ttl_store.touch(&id, self.ttl);
        debug!(sid = %id, "session registered");
    }

    /// Session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.sessions.get(id).map(|e| Arc::clone(&e.session))
    }

    /// Registered session count.
    pub fn len(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind `transport` to session `id` under connection `conn_id`.
    ///
    /// The session's previous transport and whatever the connection was
    /// bound to before are evicted and closed.
    pub fn attach(
        &self,
        id: &str,
        conn_id: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut evicted = Evicted::default();
        let session = {
            let mut maps = self.write();
            let Some(entry) = maps.sessions.get(id) else {
                return Err(RegistryError::SessionNotFound(id.to_string()));
            };
            let session = Arc::clone(&entry.session);
            let observer = self.install_observer(&session);

            // The connection may currently serve another session.
            if let Some(other_id) = maps.connections.get(conn_id).cloned() {
                if other_id != id {
                    if let Some(other) = maps.sessions.get_mut(&other_id) {
                        other.conn_id = None;
                        if let Some(stale) = other.transport.take() {
                            other.session.unbind_transport(&stale);
                            evicted.evict(stale);
                        }
                    }
                }
            }

            let Some(entry) = maps.sessions.get_mut(id) else {
                return Err(RegistryError::SessionNotFound(id.to_string()));
            };
            let old_conn = entry.conn_id.replace(conn_id.to_string());
            if let Some(old) = entry.transport.replace(Arc::clone(&transport)) {
                if !Arc::ptr_eq(&old, &transport) {
                    evicted.evict(old);
                }
            }
            if let Some(old) = entry.observer.replace(observer) {
                evicted.observers.push((Arc::clone(&session), old));
            }
            if let Some(old_conn) = old_conn.filter(|c| c != conn_id) {
                maps.connections.remove(&old_conn);
            }
            maps.connections.insert(conn_id.to_string(), id.to_string());
            // Swapped under the registry lock so concurrent attaches leave the
            // session slot agreeing with the entry.
            if let Some(previous) = session.swap_transport(Some(Arc::clone(&transport))) {
                if !Arc::ptr_eq(&previous, &transport) {
                    evicted.evict(previous);
                }
            }
            session
        };
        evicted.release();
        self.ttl_store.touch(id, self.ttl);
        debug!(sid = %id, conn = %conn_id, "transport attached");
        Ok(session)
    }

    /// Release the transport bound under `conn_id`; the session stays.
    pub fn detach(&self, conn_id: &str) -> Result<(), RegistryError> {
        let (session, transport) = {
            let mut maps = self.write();
            let Some(sid) = maps.connections.remove(conn_id) else {
                return Err(RegistryError::MissingConnection(conn_id.to_string()));
            };
            let Some(entry) = maps.sessions.get_mut(&sid) else {
                return Err(RegistryError::SessionNotFound(sid));
            };
            entry.conn_id = None;
            let transport = entry.transport.take();
            if let Some(t) = &transport {
                entry.session.unbind_transport(t);
            }
            (Arc::clone(&entry.session), transport)
        };
        if let Some(transport) = transport {
            close_quietly(transport.as_ref());
        }
        debug!(sid = %session.id(), conn = %conn_id, "transport detached");
        Ok(())
    }

    /// Session and transport serving `conn_id`.
    pub fn lookup_by_connection(
        &self,
        conn_id: &str,
    ) -> Result<(Arc<Session>, Arc<dyn Transport>), RegistryError> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        let entry = maps
            .connections
            .get(conn_id)
            .and_then(|sid| maps.sessions.get(sid))
            .ok_or_else(|| RegistryError::MissingConnection(conn_id.to_string()))?;
        let transport = entry
            .transport
            .clone()
            .ok_or_else(|| RegistryError::MissingTransport(conn_id.to_string()))?;
        Ok((Arc::clone(&entry.session), transport))
    }

    /// Drop session `id` with its connection index, observer and TTL record,
    /// then close it.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut evicted = Evicted::default();
        let session = Self::take_entry(&mut self.write(), id, &mut evicted)?;
        self.ttl_store.remove(id);
        evicted.release();
        Some(session)
    }

    // Detaches `id` from both indexes and schedules its teardown.
    fn take_entry(maps: &mut Maps, id: &str, evicted: &mut Evicted) -> Option<Arc<Session>> {
        let entry = maps.sessions.remove(id)?;
        if let Some(conn) = &entry.conn_id {
            maps.connections.remove(conn);
        }
        if let Some(obs) = entry.observer {
            evicted.observers.push((Arc::clone(&entry.session), obs));
        }
        evicted.sessions.push(Arc::clone(&entry.session));
        Some(entry.session)
    }

    /// Remove and close every session whose TTL lapsed or whose idle check
    /// fails at `now`. Returns their ids.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let mut evicted = Evicted::default();
        let mut swept = Vec::new();
        {
            let mut maps = self.write();
            let mut ids = self.ttl_store.expired(now);
            ids.extend(
                maps.sessions
                    .iter()
                    .filter(|(_, e)| e.session.is_idle(now))
                    .map(|(id, _)| id.clone()),
            );
            ids.sort();
            ids.dedup();
            for id in ids {
                if Self::take_entry(&mut maps, &id, &mut evicted).is_some() {
                    swept.push(id);
                }
            }
        }
        for id in &swept {
            self.ttl_store.remove(id);
        }
        evicted.release();
        if !swept.is_empty() {
            info!(count = swept.len(), "swept expired sessions");
        }
        swept
    }
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }

    /// Whether the loop already exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run [`Registry::sweep_expired`] every `interval` until shut down.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_sweeper(registry: Arc<Registry>, interval: Duration) -> SweeperHandle {
    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.sweep_expired(Instant::now());
                }
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("sweeper stopped");
    });
    SweeperHandle { stop, task }
}
