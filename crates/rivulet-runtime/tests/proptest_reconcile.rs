//! Property tests for batch reconciliation.
//!
//! 1. Instructions on one element run in priority order, ties in attribute
//!    order.
//! 2. Any number of changes to one element between two flushes produce a
//!    single visit that sees the final value.
//! 3. After every flush, the mounted droplets are exactly the connected
//!    elements that reference the controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use rivulet_core::{Document, NodeId};
use rivulet_runtime::{Flow, FnWorker, HookOptions, Opcode, Runtime, mount, unmount};

// ── Helpers ─────────────────────────────────────────────────────────────

fn fresh() -> (Document, Runtime, NodeId) {
    let doc = Document::new();
    let root = doc.create_element("main");
    doc.append_child(doc.body(), root).unwrap();
    let runtime = Runtime::new(doc.clone());
    (doc, runtime, root)
}

type Log = Rc<RefCell<Vec<(String, Opcode, Option<String>)>>>;

fn recorder(runtime: &Runtime, name: &str, priority: i32, log: &Log) {
    let (n, l) = (name.to_owned(), Rc::clone(log));
    runtime
        .instruction(FnWorker::new(name, priority).on_mount(
            move |_, opcode, instruction, _| {
                l.borrow_mut()
                    .push((n.clone(), opcode, instruction.value().map(str::to_owned)));
                Ok(Flow::Continue)
            },
        ))
        .unwrap();
}

fn controller_elements(doc: &Document, root: NodeId) -> usize {
    doc.descendants(root)
        .into_iter()
        .filter(|n| {
            doc.get_attribute(*n, "x-controller")
                .is_some_and(|v| v.split_whitespace().any(|t| t == "c"))
        })
        .count()
}

#[derive(Debug, Clone)]
enum Op {
    Append { target: usize, nested: bool },
    Remove { target: usize },
    SetController { target: usize, on: bool },
    DropController { target: usize },
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), any::<bool>()).prop_map(|(target, nested)| Op::Append { target, nested }),
        2 => any::<usize>().prop_map(|target| Op::Remove { target }),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(target, on)| Op::SetController { target, on }),
        1 => any::<usize>().prop_map(|target| Op::DropController { target }),
        2 => Just(Op::Flush),
    ]
}

fn apply(doc: &Document, root: NodeId, op: &Op) {
    let elements = doc.descendants(root);
    match *op {
        Op::Append { target, nested } => {
            let parent = if target % (elements.len() + 1) == 0 {
                root
            } else {
                elements[target % (elements.len() + 1) - 1]
            };
            let markup = if nested {
                r#"<div x-controller="c"><p x-controller="c other"></p></div>"#
            } else {
                r#"<span x-controller="c"></span>"#
            };
            doc.append_html(parent, markup).unwrap();
        }
        Op::Remove { target } if !elements.is_empty() => {
            doc.remove(elements[target % elements.len()]).unwrap();
        }
        Op::SetController { target, on } if !elements.is_empty() => {
            let value = if on { "c" } else { "other" };
            doc.set_attribute(elements[target % elements.len()], "x-controller", value)
                .unwrap();
        }
        Op::DropController { target } if !elements.is_empty() => {
            doc.remove_attribute(elements[target % elements.len()], "x-controller")
                .unwrap();
        }
        _ => {}
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Priority order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn instructions_run_in_priority_order(
        priorities in proptest::collection::vec(-3i32..4, 1..6),
        order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let (doc, runtime, root) = fresh();
        let log: Log = Rc::default();
        for (i, priority) in priorities.iter().enumerate() {
            recorder(&runtime, &format!("w{i}"), *priority, &log);
        }
        let element = doc.create_element("div");
        let attributes: Vec<usize> = order.into_iter().filter(|i| *i < priorities.len()).collect();
        for i in &attributes {
            doc.set_attribute(element, &format!("x-w{i}"), "v").unwrap();
        }
        doc.append_child(root, element).unwrap();
        runtime.observe(root).unwrap();

        let mut expected = attributes.clone();
        expected.sort_by_key(|i| priorities[*i]);
        let expected: Vec<String> = expected.iter().map(|i| format!("w{i}")).collect();
        let seen: Vec<String> = log.borrow().iter().map(|(n, _, _)| n.clone()).collect();
        prop_assert_eq!(seen, expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. One visit per element per flush
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn changes_between_flushes_coalesce(
        values in proptest::collection::vec("[a-z]{1,4}", 1..12),
    ) {
        let (doc, runtime, root) = fresh();
        let log: Log = Rc::default();
        recorder(&runtime, "mark", 1, &log);
        let element = doc.create_element("div");
        doc.append_child(root, element).unwrap();
        runtime.observe(root).unwrap();
        prop_assert!(log.borrow().is_empty());

        for value in &values {
            doc.set_attribute(element, "x-mark", value).unwrap();
        }
        runtime.force().unwrap();

        let log = log.borrow();
        prop_assert_eq!(log.len(), 1);
        prop_assert_eq!(log[0].1, Opcode::Mutate);
        prop_assert_eq!(log[0].2.as_deref(), values.last().map(String::as_str));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Mounted droplets track the live tree
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mounted_droplets_match_connected_controllers(
        ops in proptest::collection::vec(op_strategy(), 1..40),
    ) {
        let (doc, runtime, root) = fresh();
        let live = Rc::new(Cell::new(0i64));
        let l = Rc::clone(&live);
        runtime
            .register("c", move |_| {
                let (m, u) = (Rc::clone(&l), Rc::clone(&l));
                mount(move || { m.set(m.get() + 1); Ok(()) }, HookOptions::default())?;
                unmount(move || { u.set(u.get() - 1); Ok(()) }, HookOptions::default())
            })
            .unwrap();
        runtime.observe(root).unwrap();

        for op in ops.iter().chain(std::iter::once(&Op::Flush)) {
            if matches!(op, Op::Flush) {
                runtime.force().unwrap();
                prop_assert!(!runtime.has_pending());
                prop_assert_eq!(live.get(), controller_elements(&doc, root) as i64);
                for element in doc.descendants(root) {
                    let mounted = rivulet_runtime::instructions::droplets(&runtime, element)
                        .iter()
                        .any(|d| d.name() == "c" && d.is_mounted());
                    let wanted = doc
                        .get_attribute(element, "x-controller")
                        .is_some_and(|v| v.split_whitespace().any(|t| t == "c"));
                    prop_assert_eq!(mounted, wanted);
                }
            } else {
                apply(&doc, root, op);
            }
        }
        prop_assert!(runtime.is_idle());
    }
}
