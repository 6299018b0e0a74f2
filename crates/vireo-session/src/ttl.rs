// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Time-to-live records for session eviction.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Expiry bookkeeping keyed by session id.
pub trait TtlStore: Send + Sync {
    /// Set `id` to expire `ttl` from now. A zero `ttl` removes the record,
    /// and so does one too large to fall on the clock (no expiry).
    fn touch(&self, id: &str, ttl: Duration);

    /// Forget `id`.
    fn remove(&self, id: &str);

    /// Remove and return every id whose expiry is at or before `now`.
    fn expired(&self, now: Instant) -> Vec<String>;
}

/// In-memory [`TtlStore`] guarded by its own mutex.
#[derive(Debug, Default)]
pub struct MemoryTtlStore {
    records: Mutex<HashMap<String, Instant>>,
}

impl MemoryTtlStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expiry of `id`, if recorded.
    pub fn expires_at(&self, id: &str) -> Option<Instant> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }
}

impl TtlStore for MemoryTtlStore {
    fn touch(&self, id: &str, ttl: Duration) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match Instant::now().checked_add(ttl) {
            Some(at) if !ttl.is_zero() => {
                records.insert(id.to_string(), at);
            }
            _ => {
                records.remove(id);
            }
        }
    }

    fn remove(&self, id: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn expired(&self, now: Instant) -> Vec<String> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<String> = records
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            records.remove(id);
        }
        ids
    }
}
