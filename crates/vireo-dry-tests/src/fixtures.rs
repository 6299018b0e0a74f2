// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ready-made render trees.

use vireo_tree::{Element, Node, Stylesheet};

/// `<div id="counter">` with `dec`/`inc` buttons and the value in a `<span>`
/// carrying ref `count`.
pub fn counter_tree(count: i64) -> Node {
    Element::new("div")
        .attr("id", "counter")
        .child(Element::new("button").on("click", "dec").child(Node::text("-")))
        .child(
            Element::new("span")
                .ref_id("count")
                .child(Node::text(count.to_string())),
        )
        .child(Element::new("button").on("click", "inc").child(Node::text("+")))
        .into()
}

/// `<tag>` whose `<li>` children are keyed (and labelled) by `keys`.
pub fn keyed_list<S: AsRef<str>>(tag: &str, keys: &[S]) -> Node {
    Element::new(tag)
        .children(keys.iter().map(|k| {
            let k = k.as_ref();
            Element::new("li").key(k).child(Node::text(k))
        }))
        .into()
}

/// A page exercising every metadata kind: styles, a stylesheet, a script,
/// handlers, refs, raw HTML and a comment.
pub fn sample_page() -> Node {
    Element::new("main")
        .class(["page", "dark"])
        .style("margin", "0")
        .child(
            Element::new("style")
                .stylesheet(Stylesheet::default().rule("h1", "color", "teal")),
        )
        .child(Element::new("h1").ref_id("title").child(Node::text("Vireo <live>")))
        .child(Node::comment("list follows"))
        .child(keyed_list("ol", &["a", "b", "c"]))
        .child(
            Element::new("input")
                .attr("name", "q")
                .on("input", "search"),
        )
        .child(Element::new("div").raw_html("<em>trusted</em>"))
        .child(Element::new("script").script("clock", "tick()"))
        .into()
}
