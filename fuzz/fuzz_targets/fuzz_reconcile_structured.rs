#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rivulet_core::{Document, NodeId};
use rivulet_runtime::{HookOptions, Runtime, mount, provide};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Append { target: u8, markup: FuzzMarkup },
    Remove { target: u8 },
    SetAttribute { target: u8, name: FuzzName, value: String },
    RemoveAttribute { target: u8, name: FuzzName },
    Dispatch { target: u8 },
    Flush,
}

#[derive(Arbitrary, Debug)]
enum FuzzMarkup {
    Controller,
    Text,
    Alias,
    Ignored,
}

#[derive(Arbitrary, Debug, Clone, Copy)]
enum FuzzName {
    Controller,
    Text,
    Html,
    Bind,
    On,
    Alias,
    Ignore,
}

impl FuzzMarkup {
    fn to_markup(&self) -> &'static str {
        match self {
            Self::Controller => r#"<div x-controller="c"><span x-text="c::label"></span></div>"#,
            Self::Text => r#"<p x-text="c::label"></p>"#,
            Self::Alias => r#"<i x-alias="c::slot"></i>"#,
            Self::Ignored => r#"<div x-ignore><b x-controller="c"></b></div>"#,
        }
    }
}

impl FuzzName {
    fn to_name(self) -> &'static str {
        match self {
            Self::Controller => "x-controller",
            Self::Text => "x-text",
            Self::Html => "x-html",
            Self::Bind => "x-bind:title.preserve",
            Self::On => "x-on:click",
            Self::Alias => "x-alias",
            Self::Ignore => "x-ignore",
        }
    }
}

fn pick(doc: &Document, root: NodeId, target: u8) -> NodeId {
    let elements = doc.descendants(root);
    if elements.is_empty() {
        root
    } else {
        elements[usize::from(target) % elements.len()]
    }
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let doc = Document::new();
    let root = doc.create_element("main");
    if doc.append_child(doc.body(), root).is_err() {
        return;
    }
    let runtime = Runtime::new(doc.clone());
    let _ = runtime.register("c", |_| {
        provide("label", "text")?;
        provide("slot", rivulet_runtime::Value::Undefined)?;
        mount(|| Ok(()), HookOptions::default())
    });
    if runtime.observe(root).is_err() {
        return;
    }

    for op in ops.iter().take(256) {
        match op {
            FuzzOp::Append { target, markup } => {
                let _ = doc.append_html(pick(&doc, root, *target), markup.to_markup());
            }
            FuzzOp::Remove { target } => {
                let node = pick(&doc, root, *target);
                if node != root {
                    let _ = doc.remove(node);
                }
            }
            FuzzOp::SetAttribute { target, name, value } => {
                let _ = doc.set_attribute(pick(&doc, root, *target), name.to_name(), value);
            }
            FuzzOp::RemoveAttribute { target, name } => {
                let _ = doc.remove_attribute(pick(&doc, root, *target), name.to_name());
            }
            FuzzOp::Dispatch { target } => {
                doc.dispatch_event(pick(&doc, root, *target), "click");
            }
            FuzzOp::Flush => {
                // Errors are expected for malformed values; the runtime must
                // stay usable either way.
                let _ = runtime.force();
                assert!(runtime.is_idle());
                assert!(rivulet_runtime::active().is_none());
            }
        }
    }
    let _ = runtime.force();
    assert!(runtime.is_idle());
});
