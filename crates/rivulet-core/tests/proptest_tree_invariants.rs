//! Property-based invariant tests for the node arena and its observers.
//!
//! For any sequence of structural edits:
//!
//! 1. Parent and child links agree in both directions.
//! 2. No node appears twice among its parent's children.
//! 3. An observer on the body sees one record per attribute write on a
//!    connected node.
//! 4. The markup parser never panics on arbitrary input, and everything it
//!    builds ends up under the target element.

use proptest::prelude::*;
use rivulet_core::markup;
use rivulet_core::{Document, MutationRecord, NodeId};

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Append { parent: usize, child: usize },
    InsertFirst { parent: usize, child: usize },
    Remove { node: usize },
    SetAttr { node: usize, value: u8 },
}

fn op(nodes: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..nodes, 0..nodes).prop_map(|(parent, child)| Op::Append { parent, child }),
        (0..nodes, 0..nodes).prop_map(|(parent, child)| Op::InsertFirst { parent, child }),
        (0..nodes).prop_map(|node| Op::Remove { node }),
        (0..nodes, any::<u8>()).prop_map(|(node, value)| Op::SetAttr { node, value }),
    ]
}

fn build(count: usize) -> (Document, Vec<NodeId>) {
    let doc = Document::new();
    let mut nodes = vec![doc.body()];
    for i in 1..count {
        nodes.push(doc.create_element(&format!("n{i}")));
    }
    (doc, nodes)
}

fn check_links(doc: &Document, nodes: &[NodeId]) -> Result<(), TestCaseError> {
    for &node in nodes {
        let children = doc.child_nodes(node);
        for (i, child) in children.iter().enumerate() {
            prop_assert_eq!(doc.parent_element(*child), Some(node));
            prop_assert!(!children[i + 1..].contains(child), "duplicate child");
        }
        if let Some(parent) = doc.parent_element(node) {
            prop_assert!(doc.child_nodes(parent).contains(&node));
        }
    }
    Ok(())
}

// ═════════════════════════════════════════════════════════════════════════
// 1–2. Link consistency
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn links_stay_consistent(ops in proptest::collection::vec(op(8), 0..64)) {
        let (doc, nodes) = build(8);
        for op in ops {
            // Hierarchy errors are expected; they must leave the tree intact.
            let _ = match op {
                Op::Append { parent, child } => doc.append_child(nodes[parent], nodes[child]),
                Op::InsertFirst { parent, child } => {
                    let first = doc.child_nodes(nodes[parent]).first().copied();
                    doc.insert_before(nodes[parent], nodes[child], first)
                }
                Op::Remove { node } => doc.remove(nodes[node]),
                Op::SetAttr { node, value } => {
                    doc.set_attribute(nodes[node], "v", &value.to_string())
                }
            };
            check_links(&doc, &nodes)?;
        }
        prop_assert!(doc.parent_element(doc.body()).is_none());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Attribute records on connected nodes
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_record_per_connected_attribute_write(
        writes in proptest::collection::vec((0usize..4, any::<u8>()), 0..32),
    ) {
        let (doc, nodes) = build(4);
        for &node in &nodes[1..] {
            doc.append_child(doc.body(), node).unwrap();
        }
        let observer = doc.mutation_observer();
        observer.observe(doc.body()).unwrap();

        for (node, value) in &writes {
            doc.set_attribute(nodes[*node], "v", &value.to_string()).unwrap();
        }
        let records = observer.take_records();
        prop_assert_eq!(records.len(), writes.len());
        for (record, (node, _)) in records.iter().zip(&writes) {
            let is_attribute = matches!(record, MutationRecord::Attributes { .. });
            prop_assert!(is_attribute);
            prop_assert_eq!(record.target(), nodes[*node]);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Parser robustness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn parser_never_panics(input in "[<>/=\"' a-z&;!-]{0,64}") {
        let _ = markup::parse(&input);
        let _ = markup::parse_in("table", &input);
    }

    #[test]
    fn parsed_markup_lands_under_the_host(input in "[<>/=\"' a-z&;!-]{0,64}") {
        let doc = Document::new();
        let host = doc.create_element("div");
        let before = doc.node_count();
        doc.set_inner_html(host, &input).unwrap();
        let added = doc.node_count() - before;
        let mut seen = 0;
        let mut stack = doc.child_nodes(host);
        while let Some(node) = stack.pop() {
            seen += 1;
            stack.extend(doc.child_nodes(node));
        }
        prop_assert_eq!(seen, added);
        // A second write leaves the first children detached, not freed.
        doc.set_inner_html(host, "").unwrap();
        prop_assert_eq!(doc.node_count(), before + added);
    }

    #[test]
    fn serialized_fragment_reparses(words in proptest::collection::vec("[a-z]{1,6}", 1..6)) {
        let doc = Document::new();
        let host = doc.create_element("div");
        for word in &words {
            let el = doc.create_element("span");
            doc.set_attribute(el, "data-w", word).unwrap();
            doc.set_text_content(el, word).unwrap();
            doc.append_child(host, el).unwrap();
        }
        let html = doc.inner_html(host);
        let reparsed = markup::parse(&html);
        prop_assert_eq!(reparsed.len(), words.len());
    }
}
