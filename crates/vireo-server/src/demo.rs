// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo view served at `/`: a counter and a keyed list.

use serde_json::Value;
use vireo_proto::ClientEvt;
use vireo_session::View;
use vireo_tree::{Element, HandlerMeta, Node, Stylesheet};

/// Counter plus a reorderable keyed list.
#[derive(Debug, Clone)]
pub(crate) struct DemoView {
    count: i64,
    items: Vec<String>,
    next_item: u32,
}

impl Default for DemoView {
    fn default() -> Self {
        Self {
            count: 0,
            items: (1..=3).map(|n| format!("item-{n}")).collect(),
            next_item: 4,
        }
    }
}

impl DemoView {
    fn counter(&self) -> Element {
        Element::new("div")
            .attr("id", "counter")
            .child(Element::new("button").on("click", "dec").child(Node::text("-")))
            .child(
                Element::new("span")
                    .ref_id("count")
                    .child(Node::text(self.count.to_string())),
            )
            .child(Element::new("button").on("click", "inc").child(Node::text("+")))
    }

    fn list(&self) -> Element {
        Element::new("ul")
            .attr("id", "items")
            .children(self.items.iter().map(|item| {
                let mut remove = Element::new("button")
                    .attr("data-item", item.as_str())
                    .child(Node::text("x"));
                remove.handlers.push(HandlerMeta {
                    props: vec!["item".to_string()],
                    ..HandlerMeta::new("click", "remove")
                });
                Element::new("li")
                    .key(item.as_str())
                    .child(Node::text(item.as_str()))
                    .child(remove)
            }))
    }
}

impl View for DemoView {
    fn render(&mut self) -> Node {
        Element::new("main")
            .attr("id", "app")
            .child(
                Element::new("style").stylesheet(
                    Stylesheet::default()
                        .rule("#counter span", "font-weight", "bold")
                        .rule("#items li", "cursor", "pointer"),
                ),
            )
            .child(Element::new("h1").child(Node::text("Vireo")))
            .child(self.counter())
            .child(
                Element::new("div")
                    .class(["controls"])
                    .child(Element::new("button").on("click", "add").child(Node::text("add")))
                    .child(
                        Element::new("button")
                            .on("click", "rotate")
                            .child(Node::text("rotate")),
                    ),
            )
            .child(self.list())
            .into()
    }

    fn handle_event(&mut self, evt: &ClientEvt) {
        match evt.action.as_str() {
            "inc" => self.count += 1,
            "dec" => self.count -= 1,
            "add" => {
                self.items.insert(0, format!("item-{}", self.next_item));
                self.next_item += 1;
            }
            "rotate" => {
                if !self.items.is_empty() {
                    let first = self.items.remove(0);
                    self.items.push(first);
                }
            }
            "remove" => {
                if let Some(item) = evt.payload.get("item").and_then(Value::as_str) {
                    self.items.retain(|i| i != item);
                }
            }
            _ => {}
        }
    }
}
