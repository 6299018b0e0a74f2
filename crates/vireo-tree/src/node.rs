// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable render tree nodes produced by one render pass.
//!
//! Trees are plain data: the authoring layer builds a fresh tree per render
//! and the reconciliation engine compares two of them. Nothing here holds
//! references into a live document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes keep an ordered value list per name (e.g. class tokens).
pub type Attrs = BTreeMap<String, Vec<String>>;
/// Inline style declarations (`property -> value`).
pub type Styles = BTreeMap<String, String>;

/// One node of a render tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Node {
    /// Element with attributes, children and attached metadata.
    Element(Element),
    /// Text content.
    Text(String),
    /// Comment content.
    Comment(String),
    /// Grouping node; removed by flattening before diffing.
    Fragment(Vec<Node>),
}

impl Node {
    /// Text node.
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text(value.into())
    }

    /// Comment node.
    pub fn comment(value: impl Into<String>) -> Self {
        Node::Comment(value.into())
    }

    /// Fragment grouping `children`.
    pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
        Node::Fragment(children.into_iter().collect())
    }

    /// Element view of this node, if it is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Sibling identity key (elements only, empty keys count as absent).
    pub fn key(&self) -> Option<&str> {
        self.as_element()
            .and_then(|el| el.key.as_deref())
            .filter(|k| !k.is_empty())
    }

    /// Child list for nodes that own children.
    pub fn children(&self) -> Option<&[Node]> {
        match self {
            Node::Element(el) => Some(&el.children),
            Node::Fragment(children) => Some(children),
            Node::Text(_) | Node::Comment(_) => None,
        }
    }

    /// Mutable child list for nodes that own children.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Element(el) => Some(&mut el.children),
            Node::Fragment(children) => Some(children),
            Node::Text(_) | Node::Comment(_) => None,
        }
    }

    /// Short kind name used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Element(_) => "element",
            Node::Text(_) => "text",
            Node::Comment(_) => "comment",
            Node::Fragment(_) => "fragment",
        }
    }

    /// Resolve the node at `path` (child indices from this node).
    pub fn at_path(&self, path: &[usize]) -> Option<&Node> {
        let mut cur = self;
        for &idx in path {
            cur = cur.children()?.get(idx)?;
        }
        Some(cur)
    }
}

impl From<Element> for Node {
    fn from(el: Element) -> Self {
        Node::Element(el)
    }
}

/// Client-side event binding attached to an element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HandlerMeta {
    /// DOM event name (e.g. `click`).
    pub event: String,
    /// Server-side handler identifier invoked by the client.
    pub handler: String,
    /// Extra events that share the handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
    /// Event properties the client should send along.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub props: Vec<String>,
}

impl HandlerMeta {
    /// Binding of `event` to `handler` with no extras.
    pub fn new(event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            handler: handler.into(),
            listen: Vec::new(),
            props: Vec::new(),
        }
    }
}

/// Script attached to an element (executed client-side).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptMeta {
    /// Stable script identifier.
    pub script_id: String,
    /// Script source.
    pub content: String,
}

/// Embedded stylesheet owned by a `style` element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stylesheet {
    /// `selector -> (property -> value)`.
    pub rules: BTreeMap<String, Styles>,
}

impl Stylesheet {
    /// Add or overwrite one declaration.
    pub fn rule(
        mut self,
        selector: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.rules
            .entry(selector.into())
            .or_default()
            .insert(property.into(), value.into());
        self
    }
}

/// Element node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Element {
    /// Tag name.
    pub tag: String,
    /// Attributes with ordered value lists.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attrs,
    /// Inline style.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub style: Styles,
    /// Child nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    /// Opaque inner HTML; an element carrying it owns no diffable children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    /// Identity among siblings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Ref identifier the server can address DOM actions to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    /// Event bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<HandlerMeta>,
    /// Attached script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptMeta>,
    /// Embedded stylesheet (meaningful on `style` elements).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<Stylesheet>,
}

impl Element {
    /// Empty element with `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Set an attribute to a single value.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), vec![value.into()]);
        self
    }

    /// Append class tokens.
    pub fn class<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .entry("class".to_string())
            .or_default()
            .extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Set an inline style declaration.
    pub fn style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(property.into(), value.into());
        self
    }

    /// Set the sibling identity key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the ref identifier.
    pub fn ref_id(mut self, id: impl Into<String>) -> Self {
        self.ref_id = Some(id.into());
        self
    }

    /// Bind `event` to `handler`.
    pub fn on(mut self, event: impl Into<String>, handler: impl Into<String>) -> Self {
        self.handlers.push(HandlerMeta::new(event, handler));
        self
    }

    /// Attach a script.
    pub fn script(mut self, script_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.script = Some(ScriptMeta {
            script_id: script_id.into(),
            content: content.into(),
        });
        self
    }

    /// Attach an embedded stylesheet.
    pub fn stylesheet(mut self, sheet: Stylesheet) -> Self {
        self.stylesheet = Some(sheet);
        self
    }

    /// Set opaque inner HTML.
    pub fn raw_html(mut self, html: impl Into<String>) -> Self {
        self.raw_html = Some(html.into());
        self
    }

    /// Append one child.
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    /// Append several children.
    pub fn children<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.children.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Whether the element carries non-empty raw HTML.
    pub fn has_raw_html(&self) -> bool {
        self.raw_html.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// First value of attribute `name`, joined when it is a token list.
    pub fn attr_value(&self, name: &str) -> Option<String> {
        self.attrs.get(name).map(|v| v.join(" "))
    }
}
