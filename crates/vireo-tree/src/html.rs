// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTML serialization for the buffered (SSR) path.

use crate::node::{Element, Node, Stylesheet};

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Serialize `node` to markup.
///
/// Keys and refs are emitted as `data-key` / `data-ref` so the client can
/// re-associate server identities with DOM nodes after the initial load.
pub fn to_html(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => escape_text(text, out),
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(&text.replace("--", "- -"));
            out.push_str("-->");
        }
        Node::Fragment(children) => {
            for child in children {
                write_node(child, out);
            }
        }
        Node::Element(el) => write_element(el, out),
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, values) in &el.attrs {
        write_attr(name, &values.join(" "), out);
    }
    if !el.style.is_empty() {
        let mut decls = String::new();
        for (prop, value) in &el.style {
            decls.push_str(prop);
            decls.push(':');
            decls.push_str(value);
            decls.push(';');
        }
        write_attr("style", &decls, out);
    }
    if let Some(key) = el.key.as_deref().filter(|k| !k.is_empty()) {
        if !el.attrs.contains_key("data-key") {
            write_attr("data-key", key, out);
        }
    }
    if let Some(id) = &el.ref_id {
        write_attr("data-ref", id, out);
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    if let Some(raw) = &el.raw_html {
        out.push_str(raw);
    } else {
        if let Some(sheet) = &el.stylesheet {
            write_stylesheet(sheet, out);
        }
        for child in &el.children {
            write_node(child, out);
        }
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn write_attr(name: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

// Rule text lands inside a raw-text element; only a closing tag can escape it.
fn write_stylesheet(sheet: &Stylesheet, out: &mut String) {
    for (selector, props) in &sheet.rules {
        out.push_str(&selector.replace("</", "<\\/"));
        out.push('{');
        for (prop, value) in props {
            out.push_str(prop);
            out.push(':');
            out.push_str(&value.replace("</", "<\\/"));
            out.push(';');
        }
        out.push('}');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_text_and_attributes() {
        let node: Node = Element::new("p")
            .attr("title", "a \"q\" & <b>")
            .child(Node::text("1 < 2 & 3"))
            .into();
        assert_eq!(
            to_html(&node),
            "<p title=\"a &quot;q&quot; &amp; &lt;b&gt;\">1 &lt; 2 &amp; 3</p>"
        );
    }

    #[test]
    fn void_elements_have_no_closing_tag() {
        let node: Node = Element::new("div")
            .child(Element::new("br"))
            .child(Element::new("img").attr("src", "/a.png"))
            .into();
        assert_eq!(to_html(&node), "<div><br><img src=\"/a.png\"></div>");
    }

    #[test]
    fn raw_html_is_verbatim_and_markers_are_emitted() {
        let node: Node = Element::new("section")
            .key("k1")
            .ref_id("r1")
            .style("color", "red")
            .raw_html("<b>bold</b>")
            .into();
        assert_eq!(
            to_html(&node),
            "<section style=\"color:red;\" data-key=\"k1\" data-ref=\"r1\"><b>bold</b></section>"
        );
    }

    #[test]
    fn stylesheet_rules_render_inside_style() {
        let node: Node = Element::new("style")
            .stylesheet(Stylesheet::default().rule(".a", "color", "red").rule(".a", "top", "0"))
            .into();
        assert_eq!(to_html(&node), "<style>.a{color:red;top:0;}</style>");
    }

    #[test]
    fn fragments_and_comments_serialize_inline() {
        let node = Node::fragment([Node::comment("x--y"), Node::text("t")]);
        assert_eq!(to_html(&node), "<!--x- -y-->t");
    }
}
