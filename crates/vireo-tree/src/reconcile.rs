// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Children reconciliation (keyed and positional).
//!
//! Each children list is reconciled in two steps. First a *pairing* maps
//! every new child to at most one old child:
//!
//! * keyed lists pair by key; unkeyed children pair only with an unkeyed
//!   child at the same index;
//! * positional lists pair elements carrying a strong identity attribute by
//!   signature first, then whatever is left by index.
//!
//! Then a common emitter deletes unpaired old children (descending index),
//! walks the new list in order adding unpaired children, moving paired ones
//! whose intermediate position differs from their target, and diffing paired
//! ones in place at their target index.

use std::collections::{HashMap, VecDeque};

use crate::diff::{DiffCx, DiffError, Side};
use crate::node::Node;
use crate::patch::{MoveValue, OpKind, Patch, PatchValue};

/// Attributes whose value identifies an element among unkeyed siblings.
pub const IDENTITY_ATTRS: [&str; 5] = ["id", "src", "href", "name", "data-key"];

/// `tag|attr=value...` over the identity attributes present, if any.
pub fn identity_signature(node: &Node) -> Option<String> {
    let el = node.as_element()?;
    let mut sig = el.tag.clone();
    let mut found = false;
    for attr in IDENTITY_ATTRS {
        if let Some(value) = el.attr_value(attr) {
            sig.push('|');
            sig.push_str(attr);
            sig.push('=');
            sig.push_str(&value);
            found = true;
        }
    }
    found.then_some(sig)
}

/// Whether a children list pair is reconciled by key.
pub fn is_keyed(old: &[Node], new: &[Node]) -> bool {
    old.iter().chain(new).any(|n| n.key().is_some())
}

/// For each new child, the index of the old child it continues (if any).
type Pairing = Vec<Option<usize>>;

impl DiffCx<'_> {
    pub(crate) fn diff_children(
        &mut self,
        old: &[Node],
        new: &[Node],
        path: &mut Vec<usize>,
    ) -> Result<(), DiffError> {
        if old.is_empty() && new.is_empty() {
            return Ok(());
        }
        let pairing = if is_keyed(old, new) {
            self.keyed_pairing(old, new, path)?
        } else {
            positional_pairing(old, new)
        };
        self.emit_children(old, new, &pairing, path)
    }

    fn keyed_pairing(
        &self,
        old: &[Node],
        new: &[Node],
        path: &[usize],
    ) -> Result<Pairing, DiffError> {
        let old_keys = self.key_index(old, path, Side::Old)?;
        let new_keys = self.key_index(new, path, Side::New)?;

        let pairing = new
            .iter()
            .enumerate()
            .map(|(j, node)| match node.key() {
                Some(key) if new_keys.get(key) == Some(&j) => old_keys.get(key).copied(),
                Some(_) => None,
                None => old.get(j).filter(|o| o.key().is_none()).map(|_| j),
            })
            .collect();
        Ok(pairing)
    }

    /// `key -> first index`; later repeats go through the duplicate policy.
    fn key_index<'n>(
        &self,
        nodes: &'n [Node],
        path: &[usize],
        side: Side,
    ) -> Result<HashMap<&'n str, usize>, DiffError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let Some(key) = node.key() else { continue };
            if index.contains_key(key) {
                self.duplicate(key, path, side)?;
            } else {
                index.insert(key, i);
            }
        }
        Ok(index)
    }

    fn emit_children(
        &mut self,
        old: &[Node],
        new: &[Node],
        pairing: &[Option<usize>],
        path: &mut Vec<usize>,
    ) -> Result<(), DiffError> {
        let mut retained = vec![false; old.len()];
        for &i in pairing.iter().flatten() {
            retained[i] = true;
        }

        for i in (0..old.len()).rev().filter(|&i| !retained[i]) {
            self.emit(
                Patch::new(OpKind::DelChild, path.clone())
                    .with_index(i)
                    .with_name_opt(old[i].key()),
            );
        }

        // Intermediate list: `Some(old index)` for retained children not yet
        // placed, `None` once a slot holds its final node. Slots before the
        // current target index are always final.
        let mut slots: Vec<Option<usize>> = (0..old.len())
            .filter(|&i| retained[i])
            .map(Some)
            .collect();

        for (j, next) in new.iter().enumerate() {
            let Some(i) = pairing[j] else {
                self.emit(
                    Patch::new(OpKind::AddChild, path.clone())
                        .with_index(j)
                        .with_name_opt(next.key())
                        .with_value(PatchValue::Node(Box::new(next.clone()))),
                );
                slots.insert(j, None);
                continue;
            };

            let Some(pos) = slots[j..]
                .iter()
                .position(|s| *s == Some(i))
                .map(|p| p + j)
            else {
                // Unreachable: every paired old index sits in an unplaced slot.
                continue;
            };
            if pos != j {
                let key = old[i].key().map(str::to_string);
                self.emit(
                    Patch::new(OpKind::MoveChild, path.clone())
                        .with_index(j)
                        .with_name_opt(key.as_deref())
                        .with_value(PatchValue::Move(MoveValue { key, from: pos, to: j })),
                );
                let slot = slots.remove(pos);
                slots.insert(j, slot);
            }
            slots[j] = None;

            path.push(j);
            let res = self.diff_node(&old[i], next, path);
            path.pop();
            res?;
        }
        Ok(())
    }
}

/// Identity-signature pairs first, then index pairs among the leftovers.
fn positional_pairing(old: &[Node], new: &[Node]) -> Pairing {
    let mut by_signature: HashMap<String, VecDeque<usize>> = HashMap::new();
    for (i, node) in old.iter().enumerate() {
        if let Some(sig) = identity_signature(node) {
            by_signature.entry(sig).or_default().push_back(i);
        }
    }

    let mut pairing: Pairing = vec![None; new.len()];
    let mut taken = vec![false; old.len()];
    for (j, node) in new.iter().enumerate() {
        let Some(sig) = identity_signature(node) else { continue };
        if let Some(i) = by_signature.get_mut(&sig).and_then(VecDeque::pop_front) {
            pairing[j] = Some(i);
            taken[i] = true;
        }
    }

    for idx in 0..old.len().max(new.len()) {
        if idx < new.len() && idx < old.len() && pairing[idx].is_none() && !taken[idx] {
            pairing[idx] = Some(idx);
            taken[idx] = true;
        }
    }
    pairing
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::diff::{diff, Differ, DuplicateKey, DuplicateKeyPolicy};
    use crate::node::Element;
    use std::sync::{Arc, Mutex};

    fn keyed(keys: &[&str]) -> Node {
        Element::new("ul")
            .children(
                keys.iter()
                    .map(|k| Element::new("li").key(*k).child(Node::text(*k))),
            )
            .into()
    }

    fn ops(patches: &[Patch]) -> Vec<OpKind> {
        patches.iter().map(|p| p.op).collect()
    }

    #[test]
    fn identity_signature_lists_present_attrs_in_fixed_order() {
        let node: Node = Element::new("a").attr("name", "n").attr("href", "/g").into();
        assert_eq!(identity_signature(&node).as_deref(), Some("a|href=/g|name=n"));
        let plain: Node = Element::new("a").attr("class", "x").into();
        assert_eq!(identity_signature(&plain), None);
        assert_eq!(identity_signature(&Node::text("x")), None);
    }

    #[test]
    fn rotation_is_a_single_move() {
        let p = diff(Some(&keyed(&["a", "b", "c"])), Some(&keyed(&["c", "a", "b"])));
        assert_eq!(ops(&p), vec![OpKind::MoveChild]);
        assert_eq!(
            p[0].value,
            PatchValue::Move(MoveValue {
                key: Some("c".into()),
                from: 2,
                to: 0
            })
        );
    }

    #[test]
    fn deletes_come_first_in_descending_order() {
        let p = diff(Some(&keyed(&["a", "b", "c", "d"])), Some(&keyed(&["b", "e"])));
        assert_eq!(ops(&p), vec![OpKind::DelChild, OpKind::DelChild, OpKind::DelChild, OpKind::AddChild]);
        let deleted: Vec<_> = p[..3].iter().map(|x| x.index.unwrap()).collect();
        assert_eq!(deleted, vec![3, 2, 0]);
        assert_eq!(p[0].name.as_deref(), Some("d"));
        assert_eq!(p[3].index, Some(1));
        assert_eq!(p[3].name.as_deref(), Some("e"));
    }

    #[test]
    fn retained_keyed_child_is_diffed_at_its_target_index() {
        let old: Node = Element::new("ul")
            .child(Element::new("li").key("a").child(Node::text("1")))
            .child(Element::new("li").key("b").child(Node::text("2")))
            .into();
        let new: Node = Element::new("ul")
            .child(Element::new("li").key("x"))
            .child(Element::new("li").key("b").child(Node::text("22")))
            .into();
        let p = diff(Some(&old), Some(&new));
        assert_eq!(ops(&p), vec![OpKind::DelChild, OpKind::AddChild, OpKind::SetText]);
        assert_eq!(p[2].path, vec![1, 0]);
    }

    #[test]
    fn unkeyed_siblings_pair_by_index_inside_keyed_lists() {
        let old: Node = Element::new("div")
            .child(Node::text("head"))
            .child(Element::new("p").key("a"))
            .into();
        let new: Node = Element::new("div")
            .child(Node::text("HEAD"))
            .child(Element::new("p").key("a"))
            .into();
        let p = diff(Some(&old), Some(&new));
        assert_eq!(ops(&p), vec![OpKind::SetText]);
        assert_eq!(p[0].path, vec![0]);
    }

    #[test]
    fn identity_attrs_avoid_churn_when_a_link_is_prepended() {
        let link = |href: &str, label: &str| Element::new("a").attr("href", href).child(Node::text(label));
        let old: Node = Element::new("nav")
            .child(link("/g", "G"))
            .child(link("/s", "S"))
            .child(link("/n", "N"))
            .into();
        let new: Node = Element::new("nav")
            .child(link("/new", "New"))
            .child(link("/g", "G"))
            .child(link("/s", "S"))
            .into();
        let p = diff(Some(&old), Some(&new));
        assert_eq!(ops(&p), vec![OpKind::DelChild, OpKind::AddChild]);
        assert_eq!(p[0].index, Some(2));
        assert_eq!(p[1].index, Some(0));
    }

    #[test]
    fn positional_lists_without_identity_pair_by_index() {
        let old: Node = Element::new("div").child(Node::text("a")).child(Node::text("b")).into();
        let new: Node = Element::new("div").child(Node::text("a")).into();
        let p = diff(Some(&old), Some(&new));
        assert_eq!(ops(&p), vec![OpKind::DelChild]);
        assert_eq!(p[0].index, Some(1));
    }

    #[test]
    fn abort_policy_rejects_duplicate_keys() {
        let differ = Differ::new(DuplicateKeyPolicy::Abort);
        let err = differ
            .diff(Some(&keyed(&["a"])), Some(&keyed(&["a", "a"])))
            .unwrap_err();
        assert_eq!(
            err,
            DiffError::DuplicateKey {
                key: "a".into(),
                path: vec![]
            }
        );
    }

    #[test]
    fn report_policy_continues_and_reports() {
        let seen: Arc<Mutex<Vec<DuplicateKey>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let differ = Differ::new(DuplicateKeyPolicy::Report(Arc::new(move |dup| {
            sink.lock().unwrap().push(dup.clone());
        })));
        let p = differ
            .diff(Some(&keyed(&["a", "a"])), Some(&keyed(&["a"])))
            .unwrap();
        assert_eq!(ops(&p), vec![OpKind::DelChild]);
        assert_eq!(p[0].index, Some(1));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].side, Side::Old);
    }
}
