// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Views standing in for the authoring layer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use vireo_proto::ClientEvt;
use vireo_session::View;
use vireo_tree::Node;

use crate::fixtures::{counter_tree, keyed_list};

/// Counter bound to `inc`/`dec` handlers. See [`counter_tree`].
#[derive(Debug, Default)]
pub struct CounterView {
    /// Current value.
    pub count: i64,
}

impl View for CounterView {
    fn render(&mut self) -> Node {
        counter_tree(self.count)
    }

    fn handle_event(&mut self, evt: &ClientEvt) {
        match evt.action.as_str() {
            "inc" => self.count += 1,
            "dec" => self.count -= 1,
            _ => {}
        }
    }
}

/// `<ul>` of keyed items whose keys the test mutates between flushes.
#[derive(Debug, Clone, Default)]
pub struct KeyedListView {
    keys: Arc<Mutex<Vec<String>>>,
}

impl KeyedListView {
    /// View over `keys`.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Arc::new(Mutex::new(keys.into_iter().map(Into::into).collect())),
        }
    }

    /// Replace the keys rendered next.
    pub fn set_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.keys.lock().unwrap_or_else(PoisonError::into_inner) =
            keys.into_iter().map(Into::into).collect();
    }
}

impl View for KeyedListView {
    fn render(&mut self) -> Node {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner).clone();
        keyed_list("ul", &keys)
    }
}

/// Returns queued trees in order (repeating the last) and logs every event
/// it is handed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedView {
    frames: Arc<Mutex<VecDeque<Node>>>,
    last: Arc<Mutex<Option<Node>>>,
    events: Arc<Mutex<Vec<ClientEvt>>>,
}

impl ScriptedView {
    /// View rendering `frames` one per render.
    pub fn new(frames: impl IntoIterator<Item = Node>) -> Self {
        Self {
            frames: Arc::new(Mutex::new(frames.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Queue another tree.
    pub fn push(&self, node: Node) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(node);
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<ClientEvt> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl View for ScriptedView {
    fn render(&mut self) -> Node {
        let next = self
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = next {
            *last = Some(node);
        }
        last.clone().unwrap_or_else(|| Node::fragment([]))
    }

    fn handle_event(&mut self, evt: &ClientEvt) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(evt.clone());
    }
}
