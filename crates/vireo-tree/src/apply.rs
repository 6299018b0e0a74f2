// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference patch applicator.
//!
//! Implements the client side of the patch contract against an in-memory
//! tree. Patches are applied in slice order, which callers keep equal to
//! `seq` order.

use thiserror::Error;

use crate::node::{Element, Node};
use crate::patch::{OpKind, Patch, PatchValue};

/// Failures while applying a patch list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// A non-root patch arrived while the tree is empty.
    #[error("patch {seq} targets {path:?} but the tree is empty")]
    EmptyTree {
        /// Offending patch.
        seq: u64,
        /// Its path.
        path: Vec<usize>,
    },
    /// The path does not resolve to a node.
    #[error("patch {seq}: no node at {path:?}")]
    BadPath {
        /// Offending patch.
        seq: u64,
        /// Its path.
        path: Vec<usize>,
    },
    /// The target node has the wrong kind for the operation.
    #[error("patch {seq}: {op:?} expects {expected} at {path:?}, found {found}")]
    KindMismatch {
        /// Offending patch.
        seq: u64,
        /// Operation.
        op: OpKind,
        /// Its path.
        path: Vec<usize>,
        /// Kind the operation requires.
        expected: &'static str,
        /// Kind actually found.
        found: &'static str,
    },
    /// A child index lies outside the parent's child list.
    #[error("patch {seq}: child index {index} out of range (len {len}) at {path:?}")]
    IndexOutOfRange {
        /// Offending patch.
        seq: u64,
        /// Parent path.
        path: Vec<usize>,
        /// Requested index.
        index: usize,
        /// Child list length.
        len: usize,
    },
    /// A required field (value, name, selector, index) is missing or has the
    /// wrong shape.
    #[error("patch {seq}: {op:?} is missing its {field}")]
    Malformed {
        /// Offending patch.
        seq: u64,
        /// Operation.
        op: OpKind,
        /// Missing field.
        field: &'static str,
    },
}

/// Apply `patches` to `root` in order.
///
/// A root `replaceNode` without a value empties the tree.
pub fn apply(root: &mut Option<Node>, patches: &[Patch]) -> Result<(), ApplyError> {
    for patch in patches {
        apply_one(root, patch)?;
    }
    Ok(())
}

fn apply_one(root: &mut Option<Node>, patch: &Patch) -> Result<(), ApplyError> {
    if patch.op == OpKind::ReplaceNode && patch.path.is_empty() {
        *root = match &patch.value {
            PatchValue::Node(node) => Some((**node).clone()),
            _ => None,
        };
        return Ok(());
    }
    let Some(tree) = root.as_mut() else {
        return Err(ApplyError::EmptyTree {
            seq: patch.seq,
            path: patch.path.clone(),
        });
    };
    let target = resolve_mut(tree, &patch.path).ok_or_else(|| ApplyError::BadPath {
        seq: patch.seq,
        path: patch.path.clone(),
    })?;

    match patch.op {
        OpKind::ReplaceNode => {
            *target = node_value(patch)?.clone();
        }
        OpKind::SetText | OpKind::SetComment => {
            let text = text_value(patch)?.to_string();
            match (patch.op, target) {
                (OpKind::SetText, Node::Text(t)) | (OpKind::SetComment, Node::Comment(t)) => {
                    *t = text;
                }
                (op, other) => {
                    let expected = if op == OpKind::SetText { "text" } else { "comment" };
                    return Err(mismatch(patch, expected, other));
                }
            }
        }
        OpKind::AddChild | OpKind::DelChild | OpKind::MoveChild => {
            apply_child_op(target, patch)?;
        }
        _ => {
            let el = match target {
                Node::Element(el) => el,
                other => return Err(mismatch(patch, "element", other)),
            };
            apply_element_op(el, patch)?;
        }
    }
    Ok(())
}

fn apply_element_op(el: &mut Element, patch: &Patch) -> Result<(), ApplyError> {
    match (patch.op, &patch.value) {
        (OpKind::SetAttr, PatchValue::Attrs(changed)) => {
            el.attrs
                .extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        (OpKind::DelAttr, _) => {
            el.attrs.remove(name(patch)?);
        }
        (OpKind::SetStyle, PatchValue::Styles(changed)) => {
            el.style
                .extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        (OpKind::DelStyle, _) => {
            el.style.remove(name(patch)?);
        }
        (OpKind::SetStyleDecl, PatchValue::Text(value)) => {
            let selector = selector(patch)?;
            el.stylesheet
                .get_or_insert_default()
                .rules
                .entry(selector.to_string())
                .or_default()
                .insert(name(patch)?.to_string(), value.clone());
        }
        (OpKind::DelStyleDecl, _) => {
            let selector = selector(patch)?;
            let prop = name(patch)?;
            if let Some(sheet) = el.stylesheet.as_mut() {
                if let Some(props) = sheet.rules.get_mut(selector) {
                    props.remove(prop);
                    if props.is_empty() {
                        sheet.rules.remove(selector);
                    }
                }
                if sheet.rules.is_empty() {
                    el.stylesheet = None;
                }
            }
        }
        (OpKind::SetHandlers, PatchValue::Handlers(list)) => el.handlers.clone_from(list),
        (OpKind::SetScript, PatchValue::Script(script)) => el.script = Some(script.clone()),
        (OpKind::DelScript, _) => el.script = None,
        (OpKind::SetRef, PatchValue::Text(id)) => el.ref_id = Some(id.clone()),
        (OpKind::DelRef, _) => el.ref_id = None,
        (op, _) => {
            return Err(ApplyError::Malformed {
                seq: patch.seq,
                op,
                field: "value",
            })
        }
    }
    Ok(())
}

fn apply_child_op(parent: &mut Node, patch: &Patch) -> Result<(), ApplyError> {
    let kind = parent.kind_name();
    let Some(children) = parent.children_mut() else {
        return Err(ApplyError::KindMismatch {
            seq: patch.seq,
            op: patch.op,
            path: patch.path.clone(),
            expected: "element",
            found: kind,
        });
    };
    let out_of_range = |index: usize, len: usize| ApplyError::IndexOutOfRange {
        seq: patch.seq,
        path: patch.path.clone(),
        index,
        len,
    };

    match patch.op {
        OpKind::AddChild => {
            let index = index(patch)?;
            if index > children.len() {
                return Err(out_of_range(index, children.len()));
            }
            children.insert(index, node_value(patch)?.clone());
        }
        OpKind::DelChild => {
            let index = index(patch)?;
            if index >= children.len() {
                return Err(out_of_range(index, children.len()));
            }
            children.remove(index);
        }
        _ => {
            let PatchValue::Move(mv) = &patch.value else {
                return Err(ApplyError::Malformed {
                    seq: patch.seq,
                    op: patch.op,
                    field: "value",
                });
            };
            if mv.from >= children.len() {
                return Err(out_of_range(mv.from, children.len()));
            }
            if mv.to >= children.len() {
                return Err(out_of_range(mv.to, children.len()));
            }
            let node = children.remove(mv.from);
            children.insert(mv.to, node);
        }
    }
    Ok(())
}

fn resolve_mut<'a>(root: &'a mut Node, path: &[usize]) -> Option<&'a mut Node> {
    let mut cur = root;
    for &idx in path {
        cur = cur.children_mut()?.get_mut(idx)?;
    }
    Some(cur)
}

fn mismatch(patch: &Patch, expected: &'static str, found: &Node) -> ApplyError {
    ApplyError::KindMismatch {
        seq: patch.seq,
        op: patch.op,
        path: patch.path.clone(),
        expected,
        found: found.kind_name(),
    }
}

fn malformed(patch: &Patch, field: &'static str) -> ApplyError {
    ApplyError::Malformed {
        seq: patch.seq,
        op: patch.op,
        field,
    }
}

fn node_value(patch: &Patch) -> Result<&Node, ApplyError> {
    match &patch.value {
        PatchValue::Node(node) => Ok(node),
        _ => Err(malformed(patch, "value")),
    }
}

fn text_value(patch: &Patch) -> Result<&str, ApplyError> {
    match &patch.value {
        PatchValue::Text(text) => Ok(text),
        _ => Err(malformed(patch, "value")),
    }
}

fn name(patch: &Patch) -> Result<&str, ApplyError> {
    patch.name.as_deref().ok_or_else(|| malformed(patch, "name"))
}

fn selector(patch: &Patch) -> Result<&str, ApplyError> {
    patch
        .selector
        .as_deref()
        .ok_or_else(|| malformed(patch, "selector"))
}

fn index(patch: &Patch) -> Result<usize, ApplyError> {
    patch.index.ok_or_else(|| malformed(patch, "index"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::diff::diff;
    use crate::flatten::flatten;
    use crate::node::Stylesheet;
    use crate::patch::MoveValue;

    fn roundtrip(prev: &Node, next: &Node) {
        let patches = diff(Some(prev), Some(next));
        let mut tree = Some(flatten(prev));
        apply(&mut tree, &patches).unwrap();
        assert_eq!(tree, Some(flatten(next)));
    }

    #[test]
    fn root_replace_can_empty_the_tree() {
        let mut tree = Some(Node::text("x"));
        let patches = diff(tree.as_ref(), None);
        apply(&mut tree, &patches).unwrap();
        assert_eq!(tree, None);
        let next = Node::comment("c");
        apply(&mut tree, &diff(None, Some(&next))).unwrap();
        assert_eq!(tree, Some(next));
    }

    #[test]
    fn keyed_reorder_with_adds_and_deletes_roundtrips() {
        let list = |keys: &[&str]| -> Node {
            Element::new("ul")
                .children(keys.iter().map(|k| Element::new("li").key(*k).child(Node::text(*k))))
                .into()
        };
        roundtrip(&list(&["a", "b", "c", "d"]), &list(&["d", "x", "b", "a"]));
        roundtrip(&list(&["a", "b"]), &list(&[]));
        roundtrip(&list(&[]), &list(&["q", "r"]));
    }

    #[test]
    fn stylesheet_declarations_roundtrip() {
        let a: Node = Element::new("style")
            .stylesheet(Stylesheet::default().rule(".a", "color", "red").rule(".b", "margin", "0"))
            .into();
        let b: Node = Element::new("style")
            .stylesheet(Stylesheet::default().rule(".a", "color", "blue").rule(".c", "top", "1px"))
            .into();
        roundtrip(&a, &b);
        roundtrip(&a, &Element::new("style").into());
    }

    #[test]
    fn empty_tree_rejects_non_root_patches() {
        let mut tree = None;
        let err = apply(&mut tree, &[Patch::new(OpKind::DelRef, vec![0])]).unwrap_err();
        assert_eq!(err, ApplyError::EmptyTree { seq: 0, path: vec![0] });
    }

    #[test]
    fn out_of_range_move_is_reported() {
        let mut tree = Some(Node::from(Element::new("ul").child(Element::new("li"))));
        let patch = Patch::new(OpKind::MoveChild, vec![])
            .with_index(0)
            .with_value(PatchValue::Move(MoveValue { key: None, from: 3, to: 0 }));
        let err = apply(&mut tree, &[patch]).unwrap_err();
        assert!(matches!(err, ApplyError::IndexOutOfRange { index: 3, len: 1, .. }));
    }

    #[test]
    fn set_text_on_element_is_a_kind_mismatch() {
        let mut tree = Some(Node::from(Element::new("p")));
        let patch = Patch::new(OpKind::SetText, vec![]).with_value(PatchValue::Text("x".into()));
        let err = apply(&mut tree, &[patch]).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::KindMismatch { expected: "text", found: "element", .. }
        ));
    }
}
