// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Patch vocabulary exchanged with the client.

use serde::Serialize;

use crate::node::{Attrs, HandlerMeta, Node, ScriptMeta, Styles};

/// Patch operation kinds.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    /// Replace a text node's content.
    SetText,
    /// Replace a comment node's content.
    SetComment,
    /// Set (add or change) attributes; value carries every changed key.
    SetAttr,
    /// Remove one attribute (`name`).
    DelAttr,
    /// Set inline style properties; value carries every changed property.
    SetStyle,
    /// Remove one inline style property (`name`).
    DelStyle,
    /// Set one stylesheet declaration (`selector`, `name`, text value).
    SetStyleDecl,
    /// Remove one stylesheet declaration (`selector`, `name`).
    DelStyleDecl,
    /// Replace the full handler list.
    SetHandlers,
    /// Attach or replace the element script.
    SetScript,
    /// Remove the element script.
    DelScript,
    /// Set the ref identifier.
    SetRef,
    /// Remove the ref identifier.
    DelRef,
    /// Replace the node at `path`.
    ReplaceNode,
    /// Insert a child of the node at `path` at `index`.
    AddChild,
    /// Remove the child of the node at `path` at `index`.
    DelChild,
    /// Move a child of the node at `path` (`from` -> `to`).
    MoveChild,
}

/// Source and target of a `moveChild` patch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MoveValue {
    /// Key of the moved child (absent for identity-attribute matches).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Position before the move.
    #[serde(rename = "fromIndex")]
    pub from: usize,
    /// Position after the move.
    #[serde(rename = "newIdx")]
    pub to: usize,
}

/// Typed patch payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(untagged)]
pub enum PatchValue {
    /// No payload.
    #[default]
    None,
    /// Text payload (text/comment content, ref id, declaration value).
    Text(String),
    /// Changed attributes.
    Attrs(Attrs),
    /// Changed inline style properties.
    Styles(Styles),
    /// Full handler list.
    Handlers(Vec<HandlerMeta>),
    /// Script descriptor.
    Script(ScriptMeta),
    /// Whole node (replace/add).
    Node(Box<Node>),
    /// Move descriptor.
    Move(MoveValue),
}

impl PatchValue {
    /// Whether the payload is empty.
    pub fn is_none(&self) -> bool {
        matches!(self, PatchValue::None)
    }
}

/// One ordered mutation instruction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Patch {
    /// Position in the emitting diff call (strictly increasing).
    pub seq: u64,
    /// Child indices from the root to the target node.
    pub path: Vec<usize>,
    /// Operation.
    pub op: OpKind,
    /// Operation payload.
    #[serde(skip_serializing_if = "PatchValue::is_none")]
    pub value: PatchValue,
    /// Attribute/property name, or child key for child operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Stylesheet selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Child index for child operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl Patch {
    /// Patch with only `op` and `path` set; `seq` is assigned by the emitter.
    pub fn new(op: OpKind, path: Vec<usize>) -> Self {
        Self {
            seq: 0,
            path,
            op,
            value: PatchValue::None,
            name: None,
            selector: None,
            index: None,
        }
    }

    /// Set the payload.
    pub fn with_value(mut self, value: PatchValue) -> Self {
        self.value = value;
        self
    }

    /// Set the name field.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the name field when present.
    pub fn with_name_opt(mut self, name: Option<&str>) -> Self {
        self.name = name.map(str::to_string);
        self
    }

    /// Set the selector field.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Set the child index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Assigns strictly increasing `seq` values in emission order.
#[derive(Debug, Default)]
pub(crate) struct PatchSink {
    patches: Vec<Patch>,
    next_seq: u64,
}

impl PatchSink {
    pub(crate) fn push(&mut self, mut patch: Patch) {
        patch.seq = self.next_seq;
        self.next_seq += 1;
        self.patches.push(patch);
    }

    pub(crate) fn into_patches(self) -> Vec<Patch> {
        self.patches
    }
}
