#![forbid(unsafe_code)]

//! HTML fragment parsing and serialization on top of `html5ever`.
//!
//! Parsing follows the HTML fragment algorithm: markup is read in the context
//! of an element (the target of `set_inner_html`, or `<body>`), so malformed
//! input is recovered the way a browser recovers it instead of failing.
//! Comments, doctypes and processing instructions are dropped; `<template>`
//! contents become ordinary children.
//!
//! The parser builds into a small index arena implementing html5ever's
//! `TreeSink`, and the finished forest is copied into the
//! document in one step so a parse never leaves half-built nodes behind.

use std::borrow::Cow;
use std::io;

use html5ever::serialize::{Serialize, SerializeOpts, Serializer, TraversalScope, serialize};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{
    Attribute, ExpandedName, LocalName, ParseOpts, QualName, local_name, namespace_url, ns,
    parse_fragment,
};

use crate::dom::{Document, NodeId, NodeKind, Tree};
use crate::error::Result;

/// Parsed markup, independent of any document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<MarkupNode>,
    },
    Text(String),
}

enum SinkData {
    Document,
    Element {
        name: QualName,
        attributes: Vec<(String, String)>,
        template: Option<usize>,
    },
    Text(String),
    Comment,
}

struct SinkNode {
    data: SinkData,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// html5ever tree sink over an index arena; handle `0` is the document.
struct FragmentSink {
    nodes: Vec<SinkNode>,
    // Name reported for handles that are not elements.
    anonymous: QualName,
}

impl Default for FragmentSink {
    fn default() -> Self {
        Self {
            nodes: vec![SinkNode {
                data: SinkData::Document,
                parent: None,
                children: Vec::new(),
            }],
            anonymous: QualName::new(None, ns!(), LocalName::from("")),
        }
    }
}

fn attribute_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{prefix}:{}", name.local),
        None => name.local.to_string(),
    }
}

impl FragmentSink {
    fn push(&mut self, data: SinkData) -> usize {
        self.nodes.push(SinkNode {
            data,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn detach(&mut self, node: usize) {
        if let Some(parent) = self.nodes[node].parent.take() {
            self.nodes[parent].children.retain(|c| *c != node);
        }
    }

    fn is_text(&self, node: usize) -> bool {
        matches!(self.nodes[node].data, SinkData::Text(_))
    }

    /// Insert `child` under `parent` at `index`, merging text into an
    /// adjacent preceding text node. Comments are never inserted.
    fn insert(&mut self, parent: usize, index: usize, child: NodeOrText<usize>) {
        match child {
            NodeOrText::AppendNode(node) if matches!(self.nodes[node].data, SinkData::Comment) => {}
            NodeOrText::AppendNode(node) => {
                self.detach(node);
                let index = index.min(self.nodes[parent].children.len());
                self.nodes[parent].children.insert(index, node);
                self.nodes[node].parent = Some(parent);
            }
            NodeOrText::AppendText(text) => {
                let previous = index
                    .checked_sub(1)
                    .and_then(|i| self.nodes[parent].children.get(i).copied());
                if let Some(previous) = previous.filter(|p| self.is_text(*p)) {
                    if let SinkData::Text(existing) = &mut self.nodes[previous].data {
                        existing.push_str(&text);
                    }
                    return;
                }
                let node = self.push(SinkData::Text(text.to_string()));
                self.insert(parent, index, NodeOrText::AppendNode(node));
            }
        }
    }

    fn build(&self, node: usize) -> Option<MarkupNode> {
        let entry = &self.nodes[node];
        match &entry.data {
            SinkData::Text(text) => Some(MarkupNode::Text(text.clone())),
            SinkData::Element {
                name,
                attributes,
                template,
            } => {
                let mut kids = entry.children.clone();
                if let Some(contents) = template {
                    kids.extend(&self.nodes[*contents].children);
                }
                Some(MarkupNode::Element {
                    tag: name.local.to_string(),
                    attributes: attributes.clone(),
                    children: kids.into_iter().filter_map(|k| self.build(k)).collect(),
                })
            }
            SinkData::Document | SinkData::Comment => None,
        }
    }
}

impl TreeSink for FragmentSink {
    type Handle = usize;
    type Output = Vec<MarkupNode>;

    fn finish(self) -> Vec<MarkupNode> {
        // The fragment algorithm parses into an `<html>` root under the
        // document; its children are the fragment.
        let Some(&html) = self.nodes[0].children.first() else {
            return Vec::new();
        };
        self.nodes[html]
            .children
            .iter()
            .filter_map(|c| self.build(*c))
            .collect()
    }

    fn parse_error(&mut self, _message: Cow<'static, str>) {}

    fn get_document(&mut self) -> usize {
        0
    }

    fn elem_name<'a>(&'a self, target: &'a usize) -> ExpandedName<'a> {
        match &self.nodes[*target].data {
            SinkData::Element { name, .. } => name.expanded(),
            _ => self.anonymous.expanded(),
        }
    }

    fn create_element(
        &mut self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> usize {
        let template = (name.ns == ns!(html) && name.local == local_name!("template"))
            .then(|| self.push(SinkData::Document));
        let attributes = attrs
            .into_iter()
            .map(|a| (attribute_name(&a.name), a.value.to_string()))
            .collect();
        self.push(SinkData::Element {
            name,
            attributes,
            template,
        })
    }

    fn create_comment(&mut self, _text: StrTendril) -> usize {
        self.push(SinkData::Comment)
    }

    fn create_pi(&mut self, _target: StrTendril, _data: StrTendril) -> usize {
        self.push(SinkData::Comment)
    }

    fn append(&mut self, parent: &usize, child: NodeOrText<usize>) {
        let end = self.nodes[*parent].children.len();
        self.insert(*parent, end, child);
    }

    fn append_based_on_parent_node(
        &mut self,
        element: &usize,
        prev_element: &usize,
        child: NodeOrText<usize>,
    ) {
        if self.nodes[*element].parent.is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &mut self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&mut self, target: &usize) -> usize {
        match &self.nodes[*target].data {
            SinkData::Element {
                template: Some(contents),
                ..
            } => *contents,
            _ => *target,
        }
    }

    fn same_node(&self, x: &usize, y: &usize) -> bool {
        x == y
    }

    fn set_quirks_mode(&mut self, _mode: QuirksMode) {}

    fn append_before_sibling(&mut self, sibling: &usize, child: NodeOrText<usize>) {
        let Some(parent) = self.nodes[*sibling].parent else {
            return;
        };
        let index = self.nodes[parent]
            .children
            .iter()
            .position(|c| c == sibling)
            .unwrap_or(0);
        self.insert(parent, index, child);
    }

    fn add_attrs_if_missing(&mut self, target: &usize, attrs: Vec<Attribute>) {
        if let SinkData::Element { attributes, .. } = &mut self.nodes[*target].data {
            for attr in attrs {
                let name = attribute_name(&attr.name);
                if !attributes.iter().any(|(k, _)| *k == name) {
                    attributes.push((name, attr.value.to_string()));
                }
            }
        }
    }

    fn remove_from_parent(&mut self, target: &usize) {
        self.detach(*target);
    }

    fn reparent_children(&mut self, node: &usize, new_parent: &usize) {
        for child in std::mem::take(&mut self.nodes[*node].children) {
            self.nodes[child].parent = Some(*new_parent);
            self.nodes[*new_parent].children.push(child);
        }
    }
}

fn html_name(tag: &str) -> QualName {
    QualName::new(None, ns!(html), LocalName::from(tag))
}

/// Parse `input` as the content of a `<context>` element.
#[must_use]
pub fn parse_in(context: &str, input: &str) -> Vec<MarkupNode> {
    parse_fragment(
        FragmentSink::default(),
        ParseOpts::default(),
        html_name(context),
        Vec::new(),
    )
    .one(input)
}

/// Parse `input` as the content of a `<body>` element.
#[must_use]
pub fn parse(input: &str) -> Vec<MarkupNode> {
    parse_in("body", input)
}

/// A document subtree handed to html5ever's serializer.
struct Subtree<'a> {
    tree: &'a Tree,
    node: NodeId,
}

impl Serialize for Subtree<'_> {
    fn serialize<S: Serializer>(
        &self,
        serializer: &mut S,
        traversal_scope: TraversalScope,
    ) -> io::Result<()> {
        let Some(node) = self.tree.node(self.node) else {
            return Ok(());
        };
        let include = matches!(traversal_scope, TraversalScope::IncludeNode);
        match node.kind {
            NodeKind::Text if include => serializer.write_text(&node.text),
            NodeKind::Text => Ok(()),
            NodeKind::Element => {
                let name = html_name(&node.tag);
                if include {
                    let attributes: Vec<(QualName, &str)> = node
                        .attributes
                        .iter()
                        .map(|(k, v)| {
                            (QualName::new(None, ns!(), LocalName::from(k.as_str())), v.as_str())
                        })
                        .collect();
                    serializer
                        .start_elem(name.clone(), attributes.iter().map(|(k, v)| (k, *v)))?;
                }
                for child in &node.children {
                    let child = Subtree {
                        tree: self.tree,
                        node: *child,
                    };
                    child.serialize(serializer, TraversalScope::IncludeNode)?;
                }
                if include {
                    serializer.end_elem(name)?;
                }
                Ok(())
            }
        }
    }
}

impl Tree {
    fn materialize(&mut self, nodes: &[MarkupNode]) -> Vec<NodeId> {
        nodes
            .iter()
            .map(|node| match node {
                MarkupNode::Text(text) => self.alloc_text(text),
                MarkupNode::Element {
                    tag,
                    attributes,
                    children,
                } => {
                    let id = self.alloc_element(tag);
                    let kids = self.materialize(children);
                    for kid in &kids {
                        if let Some(k) = self.node_mut(*kid) {
                            k.parent = Some(id);
                        }
                    }
                    if let Some(n) = self.node_mut(id) {
                        n.attributes.clone_from(attributes);
                        n.children = kids;
                    }
                    id
                }
            })
            .collect()
    }

    fn to_html(&self, node: NodeId, traversal_scope: TraversalScope) -> String {
        let mut out = Vec::new();
        let opts = SerializeOpts {
            traversal_scope,
            ..SerializeOpts::default()
        };
        match serialize(&mut out, &Subtree { tree: self, node }, opts) {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl Document {
    /// Parse `markup` in a `<body>` context into detached nodes owned by
    /// this document.
    pub fn parse_fragment(&self, markup: &str) -> Vec<NodeId> {
        let parsed = parse(markup);
        self.tree.borrow_mut().materialize(&parsed)
    }

    /// Replace the children of `node` with `markup` parsed in its context,
    /// queueing a single child-list record.
    pub fn set_inner_html(&self, node: NodeId, markup: &str) -> Result<()> {
        let context = self.tree.borrow().element(node)?.tag.clone();
        let parsed = parse_in(&context, markup);
        let mut tree = self.tree.borrow_mut();
        let added = tree.materialize(&parsed);
        tree.replace_children(node, added);
        Ok(())
    }

    #[must_use]
    pub fn inner_html(&self, node: NodeId) -> String {
        self.tree
            .borrow()
            .to_html(node, TraversalScope::ChildrenOnly(None))
    }

    #[must_use]
    pub fn outer_html(&self, node: NodeId) -> String {
        self.tree.borrow().to_html(node, TraversalScope::IncludeNode)
    }

    /// Parse `markup` and append every top-level node to `parent`.
    pub fn append_html(&self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>> {
        let nodes = self.parse_fragment(markup);
        for node in &nodes {
            self.append_child(parent, *node)?;
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, attributes: &[(&str, &str)], children: Vec<MarkupNode>) -> MarkupNode {
        MarkupNode::Element {
            tag: tag.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).into(), (*v).into()))
                .collect(),
            children,
        }
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        let nodes = parse(r#"<div x-controller="app" hidden><span class='a b'>hi</span></div>"#);
        assert_eq!(
            nodes,
            vec![element(
                "div",
                &[("x-controller", "app"), ("hidden", "")],
                vec![element("span", &[("class", "a b")], vec![MarkupNode::Text("hi".into())])],
            )]
        );
    }

    #[test]
    fn void_elements_take_no_children_and_custom_tags_do_not_self_close() {
        let nodes = parse("<br><input value=3><x-item/>tail");
        assert_eq!(nodes.len(), 3);
        assert_eq!(
            nodes[2],
            element("x-item", &[], vec![MarkupNode::Text("tail".into())])
        );
    }

    #[test]
    fn malformed_markup_is_recovered() {
        assert_eq!(
            parse("<div><span></div>after"),
            vec![
                element("div", &[], vec![element("span", &[], vec![])]),
                MarkupNode::Text("after".into()),
            ]
        );
        assert_eq!(parse("<b></i>"), vec![element("b", &[], vec![])]);
        assert_eq!(parse("</p>"), vec![element("p", &[], vec![])]);
    }

    #[test]
    fn names_are_lowercased_and_first_attribute_wins() {
        assert_eq!(
            parse(r#"<DIV X-Text="a" x-text="b"></DIV>"#),
            vec![element("div", &[("x-text", "a")], vec![])]
        );
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            parse("a &lt;b&gt; &amp; &#65;&#x42; &nbsp;"),
            vec![MarkupNode::Text("a <b> & AB \u{a0}".into())]
        );
    }

    #[test]
    fn comments_are_dropped_and_text_merges() {
        assert_eq!(
            parse("1 < 2<!-- note -->!"),
            vec![MarkupNode::Text("1 < 2!".into())]
        );
    }

    #[test]
    fn context_element_shapes_the_parse() {
        // Inside a table, a stray `<td>` gets its row; inside a textarea
        // everything is text.
        let rows = parse_in("tbody", "<td>x</td>");
        assert_eq!(
            rows,
            vec![element(
                "tr",
                &[],
                vec![element("td", &[], vec![MarkupNode::Text("x".into())])]
            )]
        );
        assert_eq!(
            parse_in("textarea", "<b>raw</b>"),
            vec![MarkupNode::Text("<b>raw</b>".into())]
        );
    }

    #[test]
    fn template_contents_become_children() {
        assert_eq!(
            parse("<template><i>t</i></template>"),
            vec![element(
                "template",
                &[],
                vec![element("i", &[], vec![MarkupNode::Text("t".into())])]
            )]
        );
    }

    #[test]
    fn inner_html_round_trips_through_document() {
        let doc = Document::new();
        let host = doc.create_element("div");
        doc.set_inner_html(host, r#"<p title="a&quot;b">x &amp; y<br></p>"#)
            .unwrap();
        assert_eq!(doc.inner_html(host), r#"<p title="a&quot;b">x &amp; y<br></p>"#);
        assert_eq!(doc.outer_html(host), r#"<div><p title="a&quot;b">x &amp; y<br></p></div>"#);
        assert_eq!(doc.text_content(host), "x & y");
    }

    #[test]
    fn set_inner_html_requires_an_element() {
        let doc = Document::new();
        let text = doc.create_text("t");
        assert!(doc.set_inner_html(text, "<b></b>").is_err());
    }
}
