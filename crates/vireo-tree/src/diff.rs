// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reconciliation engine: compares two render trees and emits ordered patches.
//!
//! Both trees are flattened first (see [`crate::flatten`]). Node kinds that
//! differ are replaced wholesale; elements are compared attribute by attribute
//! and their children are reconciled per list, keyed or positional (see
//! [`crate::reconcile`]).
//!
//! The output contract: patches carry strictly increasing `seq` values, and
//! applying them in `seq` order to `prev` yields a tree structurally equal to
//! `next` (modulo handler order, which is compared as a set).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::flatten::flatten;
use crate::node::{Element, HandlerMeta, Node, Styles};
use crate::patch::{OpKind, Patch, PatchSink, PatchValue};

/// Which tree a duplicate key was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The previous tree.
    Old,
    /// The next tree.
    New,
}

/// A key that appears more than once in one children list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    /// The repeated key.
    pub key: String,
    /// Path of the parent whose children repeat it.
    pub path: Vec<usize>,
    /// Tree the repetition was found in.
    pub side: Side,
}

/// Callback invoked for each duplicate key under [`DuplicateKeyPolicy::Report`].
pub type DuplicateKeyReporter = Arc<dyn Fn(&DuplicateKey) + Send + Sync>;

/// What the engine does when sibling keys repeat.
#[derive(Clone)]
pub enum DuplicateKeyPolicy {
    /// Stop and return [`DiffError::DuplicateKey`].
    Abort,
    /// Report through the callback and continue: the first occurrence owns
    /// the key, later ones are treated as unmatched nodes.
    Report(DuplicateKeyReporter),
}

impl DuplicateKeyPolicy {
    /// Report policy that logs through `tracing`.
    pub fn warn() -> Self {
        DuplicateKeyPolicy::Report(Arc::new(|dup: &DuplicateKey| {
            warn!(key = %dup.key, path = ?dup.path, side = ?dup.side, "duplicate sibling key");
        }))
    }
}

impl Default for DuplicateKeyPolicy {
    fn default() -> Self {
        Self::warn()
    }
}

impl fmt::Debug for DuplicateKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateKeyPolicy::Abort => f.write_str("Abort"),
            DuplicateKeyPolicy::Report(_) => f.write_str("Report(..)"),
        }
    }
}

/// Reconciliation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// A children list repeats a key and the policy is [`DuplicateKeyPolicy::Abort`].
    #[error("duplicate key {key:?} among children at {path:?}")]
    DuplicateKey {
        /// The repeated key.
        key: String,
        /// Path of the parent.
        path: Vec<usize>,
    },
}

/// Tree differ configured with a duplicate-key policy.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    policy: DuplicateKeyPolicy,
}

impl Differ {
    /// Differ with an explicit policy.
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        Self { policy }
    }

    /// The configured policy.
    pub fn policy(&self) -> &DuplicateKeyPolicy {
        &self.policy
    }

    /// Compute the patches turning `prev` into `next`.
    ///
    /// A missing side yields a single root `replaceNode`.
    pub fn diff(&self, prev: Option<&Node>, next: Option<&Node>) -> Result<Vec<Patch>, DiffError> {
        let mut cx = DiffCx {
            policy: &self.policy,
            sink: PatchSink::default(),
        };
        match (prev.map(flatten), next.map(flatten)) {
            (None, None) => {}
            (None, Some(next)) => cx.replace(&[], Some(&next)),
            (Some(_), None) => cx.replace(&[], None),
            (Some(prev), Some(next)) => {
                let mut path = Vec::new();
                cx.diff_node(&prev, &next, &mut path)?;
            }
        }
        Ok(cx.sink.into_patches())
    }

    /// Diff two trees that are already flattened (e.g. stored snapshots).
    pub fn diff_flat(&self, prev: &Node, next: &Node) -> Result<Vec<Patch>, DiffError> {
        let mut cx = DiffCx {
            policy: &self.policy,
            sink: PatchSink::default(),
        };
        let mut path = Vec::new();
        cx.diff_node(prev, next, &mut path)?;
        Ok(cx.sink.into_patches())
    }
}

/// Diff with the default policy (duplicate keys are logged, never fatal).
pub fn diff(prev: Option<&Node>, next: Option<&Node>) -> Vec<Patch> {
    // The report policy never aborts.
    Differ::default().diff(prev, next).unwrap_or_default()
}

pub(crate) struct DiffCx<'p> {
    policy: &'p DuplicateKeyPolicy,
    pub(crate) sink: PatchSink,
}

impl DiffCx<'_> {
    pub(crate) fn emit(&mut self, patch: Patch) {
        self.sink.push(patch);
    }

    pub(crate) fn duplicate(
        &self,
        key: &str,
        path: &[usize],
        side: Side,
    ) -> Result<(), DiffError> {
        match self.policy {
            DuplicateKeyPolicy::Abort => Err(DiffError::DuplicateKey {
                key: key.to_string(),
                path: path.to_vec(),
            }),
            DuplicateKeyPolicy::Report(report) => {
                report(&DuplicateKey {
                    key: key.to_string(),
                    path: path.to_vec(),
                    side,
                });
                Ok(())
            }
        }
    }

    fn replace(&mut self, path: &[usize], next: Option<&Node>) {
        let value = next.map_or(PatchValue::None, |n| PatchValue::Node(Box::new(n.clone())));
        self.emit(Patch::new(OpKind::ReplaceNode, path.to_vec()).with_value(value));
    }

    pub(crate) fn diff_node(
        &mut self,
        prev: &Node,
        next: &Node,
        path: &mut Vec<usize>,
    ) -> Result<(), DiffError> {
        match (prev, next) {
            (Node::Text(a), Node::Text(b)) => {
                if a != b {
                    self.emit(
                        Patch::new(OpKind::SetText, path.clone())
                            .with_value(PatchValue::Text(b.clone())),
                    );
                }
            }
            (Node::Comment(a), Node::Comment(b)) => {
                if a != b {
                    self.emit(
                        Patch::new(OpKind::SetComment, path.clone())
                            .with_value(PatchValue::Text(b.clone())),
                    );
                }
            }
            (Node::Element(a), Node::Element(b)) => self.diff_element(a, b, path)?,
            (Node::Fragment(a), Node::Fragment(b)) => self.diff_children(a, b, path)?,
            _ => self.replace(path, Some(next)),
        }
        Ok(())
    }

    fn diff_element(
        &mut self,
        prev: &Element,
        next: &Element,
        path: &mut Vec<usize>,
    ) -> Result<(), DiffError> {
        // Keys are identity: a different key at the same position is a
        // different node, as it is inside keyed child lists.
        if prev.tag != next.tag || prev.key != next.key {
            self.replace(path, Some(&Node::Element(next.clone())));
            return Ok(());
        }
        let raw_prev = prev.raw_html.as_deref().filter(|h| !h.is_empty());
        let raw_next = next.raw_html.as_deref().filter(|h| !h.is_empty());
        if (raw_prev.is_some() || raw_next.is_some()) && raw_prev != raw_next {
            self.replace(path, Some(&Node::Element(next.clone())));
            return Ok(());
        }

        self.diff_attrs(prev, next, path);
        self.diff_style(&prev.style, &next.style, path);
        if next.tag == "style" {
            self.diff_stylesheet(prev, next, path);
        }
        self.diff_ref(prev, next, path);
        if !handlers_equal(&prev.handlers, &next.handlers) {
            self.emit(
                Patch::new(OpKind::SetHandlers, path.clone())
                    .with_value(PatchValue::Handlers(next.handlers.clone())),
            );
        }
        if prev.script != next.script {
            let patch = match &next.script {
                Some(script) => Patch::new(OpKind::SetScript, path.clone())
                    .with_value(PatchValue::Script(script.clone())),
                None => Patch::new(OpKind::DelScript, path.clone()),
            };
            self.emit(patch);
        }

        if raw_next.is_none() {
            self.diff_children(&prev.children, &next.children, path)?;
        }
        Ok(())
    }

    fn diff_attrs(&mut self, prev: &Element, next: &Element, path: &[usize]) {
        let changed: BTreeMap<String, Vec<String>> = next
            .attrs
            .iter()
            .filter(|(k, v)| prev.attrs.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !changed.is_empty() {
            self.emit(Patch::new(OpKind::SetAttr, path.to_vec()).with_value(PatchValue::Attrs(changed)));
        }
        for name in prev.attrs.keys().filter(|k| !next.attrs.contains_key(*k)) {
            self.emit(Patch::new(OpKind::DelAttr, path.to_vec()).with_name(name.clone()));
        }
    }

    fn diff_style(&mut self, prev: &Styles, next: &Styles, path: &[usize]) {
        let changed: Styles = next
            .iter()
            .filter(|(k, v)| prev.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !changed.is_empty() {
            self.emit(Patch::new(OpKind::SetStyle, path.to_vec()).with_value(PatchValue::Styles(changed)));
        }
        for name in prev.keys().filter(|k| !next.contains_key(*k)) {
            self.emit(Patch::new(OpKind::DelStyle, path.to_vec()).with_name(name.clone()));
        }
    }

    fn diff_stylesheet(&mut self, prev: &Element, next: &Element, path: &[usize]) {
        let empty = BTreeMap::new();
        let old_rules = prev.stylesheet.as_ref().map_or(&empty, |s| &s.rules);
        let new_rules = next.stylesheet.as_ref().map_or(&empty, |s| &s.rules);

        for (selector, props) in new_rules {
            let old_props = old_rules.get(selector);
            for (prop, value) in props {
                if old_props.and_then(|p| p.get(prop)) != Some(value) {
                    self.emit(
                        Patch::new(OpKind::SetStyleDecl, path.to_vec())
                            .with_selector(selector.clone())
                            .with_name(prop.clone())
                            .with_value(PatchValue::Text(value.clone())),
                    );
                }
            }
        }
        for (selector, props) in old_rules {
            let new_props = new_rules.get(selector);
            for prop in props.keys() {
                if new_props.map_or(true, |p| !p.contains_key(prop)) {
                    self.emit(
                        Patch::new(OpKind::DelStyleDecl, path.to_vec())
                            .with_selector(selector.clone())
                            .with_name(prop.clone()),
                    );
                }
            }
        }
    }

    fn diff_ref(&mut self, prev: &Element, next: &Element, path: &[usize]) {
        if prev.ref_id == next.ref_id {
            return;
        }
        let patch = match &next.ref_id {
            Some(id) => {
                Patch::new(OpKind::SetRef, path.to_vec()).with_value(PatchValue::Text(id.clone()))
            }
            None => Patch::new(OpKind::DelRef, path.to_vec()),
        };
        self.emit(patch);
    }
}

/// Order-independent handler list equality, sorted by `(event, handler)`.
pub fn handlers_equal(a: &[HandlerMeta], b: &[HandlerMeta]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    sorted_handlers(a) == sorted_handlers(b)
}

fn sorted_handlers(list: &[HandlerMeta]) -> Vec<&HandlerMeta> {
    let mut out: Vec<&HandlerMeta> = list.iter().collect();
    out.sort_by(|x, y| (&x.event, &x.handler).cmp(&(&y.event, &y.handler)));
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::node::Stylesheet;

    fn ops(patches: &[Patch]) -> Vec<OpKind> {
        patches.iter().map(|p| p.op).collect()
    }

    #[test]
    fn missing_sides_replace_the_root() {
        let node = Node::text("x");
        let p = diff(None, Some(&node));
        assert_eq!(ops(&p), vec![OpKind::ReplaceNode]);
        assert!(p[0].path.is_empty());
        let p = diff(Some(&node), None);
        assert_eq!(p[0].value, PatchValue::None);
        assert!(diff(None, None).is_empty());
    }

    #[test]
    fn kind_mismatch_replaces() {
        let p = diff(Some(&Node::text("x")), Some(&Node::comment("x")));
        assert_eq!(ops(&p), vec![OpKind::ReplaceNode]);
    }

    #[test]
    fn tag_mismatch_replaces() {
        let a: Node = Element::new("p").into();
        let b: Node = Element::new("div").into();
        assert_eq!(ops(&diff(Some(&a), Some(&b))), vec![OpKind::ReplaceNode]);
    }

    #[test]
    fn root_key_change_replaces() {
        let a: Node = Element::new("style").into();
        let b: Node = Element::new("style").key("k1").into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::ReplaceNode]);
        let mut tree = Some(a);
        crate::apply::apply(&mut tree, &p).unwrap();
        assert_eq!(tree, Some(b));

        let a = Node::fragment([Node::from(Element::new("li").key("a"))]);
        let b = Node::fragment([Node::from(Element::new("li").key("b"))]);
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::ReplaceNode]);
        assert!(p[0].path.is_empty());
    }

    #[test]
    fn text_change_targets_text_path() {
        let a: Node = Element::new("p").child(Node::text("a")).into();
        let b: Node = Element::new("p").child(Node::text("b")).into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::SetText]);
        assert_eq!(p[0].path, vec![0]);
        assert_eq!(p[0].value, PatchValue::Text("b".into()));
    }

    #[test]
    fn attrs_batch_sets_and_split_deletes() {
        let a: Node = Element::new("a")
            .attr("href", "/x")
            .attr("title", "t")
            .attr("rel", "r")
            .into();
        let b: Node = Element::new("a")
            .attr("href", "/y")
            .attr("target", "_blank")
            .into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::SetAttr, OpKind::DelAttr, OpKind::DelAttr]);
        let PatchValue::Attrs(changed) = &p[0].value else {
            panic!("expected attrs payload");
        };
        assert_eq!(changed.len(), 2);
        let removed: Vec<_> = p[1..].iter().filter_map(|x| x.name.as_deref()).collect();
        assert_eq!(removed, vec!["rel", "title"]);
    }

    #[test]
    fn style_changes_mirror_attrs() {
        let a: Node = Element::new("div").style("color", "red").style("margin", "0").into();
        let b: Node = Element::new("div").style("color", "blue").into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::SetStyle, OpKind::DelStyle]);
        assert_eq!(p[1].name.as_deref(), Some("margin"));
    }

    #[test]
    fn raw_html_change_replaces_without_child_patches() {
        let a: Node = Element::new("div").raw_html("<b>a</b>").into();
        let b: Node = Element::new("div").raw_html("<b>b</b>").into();
        assert_eq!(ops(&diff(Some(&a), Some(&b))), vec![OpKind::ReplaceNode]);

        let same: Node = Element::new("div").raw_html("<b>a</b>").attr("id", "z").into();
        assert_eq!(ops(&diff(Some(&a), Some(&same))), vec![OpKind::SetAttr]);
    }

    #[test]
    fn stylesheet_is_diffed_per_declaration_on_style_elements() {
        let a: Node = Element::new("style")
            .stylesheet(Stylesheet::default().rule(".a", "color", "red").rule(".b", "margin", "0"))
            .into();
        let b: Node = Element::new("style")
            .stylesheet(Stylesheet::default().rule(".a", "color", "blue"))
            .into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::SetStyleDecl, OpKind::DelStyleDecl]);
        assert_eq!(p[0].selector.as_deref(), Some(".a"));
        assert_eq!(p[1].selector.as_deref(), Some(".b"));
        assert_eq!(p[1].name.as_deref(), Some("margin"));
    }

    #[test]
    fn handler_order_does_not_matter() {
        let a: Node = Element::new("button").on("click", "inc").on("focus", "f").into();
        let b: Node = Element::new("button").on("focus", "f").on("click", "inc").into();
        assert!(diff(Some(&a), Some(&b)).is_empty());

        let c: Node = Element::new("button").on("click", "dec").into();
        let p = diff(Some(&a), Some(&c));
        assert_eq!(ops(&p), vec![OpKind::SetHandlers]);
        assert_eq!(p[0].value, PatchValue::Handlers(vec![HandlerMeta::new("click", "dec")]));
    }

    #[test]
    fn ref_and_script_set_and_delete() {
        let a: Node = Element::new("div").ref_id("r1").script("s", "x()").into();
        let b: Node = Element::new("div").ref_id("r2").into();
        let p = diff(Some(&a), Some(&b));
        assert_eq!(ops(&p), vec![OpKind::SetRef, OpKind::DelScript]);
        let p = diff(Some(&b), Some(&a));
        assert_eq!(ops(&p), vec![OpKind::SetRef, OpKind::SetScript]);
        let plain: Node = Element::new("div").into();
        assert_eq!(ops(&diff(Some(&b), Some(&plain))), vec![OpKind::DelRef]);
    }

    #[test]
    fn seq_is_strictly_increasing() {
        let a: Node = Element::new("div").attr("a", "1").ref_id("x").child(Node::text("t")).into();
        let b: Node = Element::new("div").attr("a", "2").child(Node::text("u")).into();
        let p = diff(Some(&a), Some(&b));
        assert!(p.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(p[0].seq, 0);
    }
}
