// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Metadata-only patches for booting a client over server-rendered markup.
//!
//! SSR markup already carries structure and content; what it cannot carry
//! is refs, handler bindings and scripts. The boot message ships those as
//! patches addressed by path into the flattened tree.

use crate::flatten::flatten;
use crate::node::Node;
use crate::patch::{OpKind, Patch, PatchSink, PatchValue};

/// `setRef`, `setHandlers` and `setScript` for every element carrying them,
/// in document order.
pub fn metadata_patches(tree: &Node) -> Vec<Patch> {
    let flat = flatten(tree);
    let mut sink = PatchSink::default();
    let mut path = Vec::new();
    collect(&flat, &mut path, &mut sink);
    sink.into_patches()
}

fn collect(node: &Node, path: &mut Vec<usize>, sink: &mut PatchSink) {
    if let Node::Element(el) = node {
        if let Some(id) = &el.ref_id {
            sink.push(Patch::new(OpKind::SetRef, path.clone()).with_value(PatchValue::Text(id.clone())));
        }
        if !el.handlers.is_empty() {
            sink.push(
                Patch::new(OpKind::SetHandlers, path.clone())
                    .with_value(PatchValue::Handlers(el.handlers.clone())),
            );
        }
        if let Some(script) = &el.script {
            sink.push(
                Patch::new(OpKind::SetScript, path.clone())
                    .with_value(PatchValue::Script(script.clone())),
            );
        }
    }
    for (i, child) in node.children().unwrap_or_default().iter().enumerate() {
        path.push(i);
        collect(child, path, sink);
        path.pop();
    }
}
