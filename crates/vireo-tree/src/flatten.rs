// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fragment flattening applied to both trees before diffing.

use crate::node::{Element, Node};

/// Splice every fragment into its parent's child list, recursively.
///
/// A root fragment collapses to its only child when it has exactly one;
/// otherwise it stays a fragment whose children contain no fragments.
pub fn flatten(node: &Node) -> Node {
    match node {
        Node::Fragment(children) => {
            let mut flat = flatten_children(children);
            if flat.len() == 1 {
                flat.remove(0)
            } else {
                Node::Fragment(flat)
            }
        }
        Node::Element(el) => Node::Element(flatten_element(el)),
        Node::Text(_) | Node::Comment(_) => node.clone(),
    }
}

fn flatten_element(el: &Element) -> Element {
    Element {
        children: flatten_children(&el.children),
        ..el.clone_without_children()
    }
}

/// Flatten a child list, splicing nested fragments in place.
pub fn flatten_children(children: &[Node]) -> Vec<Node> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        push_flat(child, &mut out);
    }
    out
}

fn push_flat(node: &Node, out: &mut Vec<Node>) {
    match node {
        Node::Fragment(children) => {
            for child in children {
                push_flat(child, out);
            }
        }
        Node::Element(el) => out.push(Node::Element(flatten_element(el))),
        Node::Text(_) | Node::Comment(_) => out.push(node.clone()),
    }
}

impl Element {
    fn clone_without_children(&self) -> Element {
        Element {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            style: self.style.clone(),
            children: Vec::new(),
            raw_html: self.raw_html.clone(),
            key: self.key.clone(),
            ref_id: self.ref_id.clone(),
            handlers: self.handlers.clone(),
            script: self.script.clone(),
            stylesheet: self.stylesheet.clone(),
        }
    }
}
