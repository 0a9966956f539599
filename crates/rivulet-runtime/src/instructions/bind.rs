#![forbid(unsafe_code)]

//! `x-bind:<attr>.camel.preserve="c::value"`: mirror a value into an
//! attribute.
//!
//! A falsy value removes the attribute. With `preserve` the attribute's
//! value at bind time is kept as a base and the bound value is appended to
//! it (`"base value"`). Unbinding restores the base.

use std::cell::RefCell;

use ahash::AHashMap;
use rivulet_core::{Document, NodeId, WeakDocument};
use tracing::warn;

use crate::error::{Error, Result};
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::{Bound, Reference};
use crate::modifiers::{Kind, Modifiers, Schema, camel_case};
use crate::reactive::watch;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::value::Value;
use crate::visitor::Opcode;

const SCHEMA: Schema = &[("camel", Kind::Flag), ("preserve", Kind::Flag)];

struct Binding {
    bound: Bound,
    name: String,
    base: Option<String>,
}

impl Binding {
    fn release(self, document: &Document, root: NodeId) -> Result<()> {
        drop(self.bound);
        match &self.base {
            Some(base) => document.set_attribute(root, &self.name, base)?,
            None => {
                document.remove_attribute(root, &self.name)?;
            }
        }
        Ok(())
    }
}

/// Keyed by the full instruction attribute name.
#[derive(Default)]
struct BindSlot(RefCell<AHashMap<String, Binding>>);

fn compose(base: Option<&str>, value: &Value) -> Option<String> {
    let value = value.is_truthy().then(|| value.display());
    match (base, value) {
        (Some(base), Some(value)) if !base.is_empty() => Some(format!("{base} {value}")),
        (_, Some(value)) => Some(value),
        (base, None) => base.map(str::to_owned),
    }
}

fn apply(weak: &WeakDocument, root: NodeId, name: &str, base: Option<&str>, value: &Value) {
    let Some(document) = weak.upgrade() else {
        return;
    };
    let result = match compose(base, value) {
        Some(text) => document.set_attribute(root, name, &text),
        None => document.remove_attribute(root, name).map(|_| ()),
    };
    if let Err(err) = result {
        warn!(element = root.raw(), attribute = name, error = %err, "bind update failed");
    }
}

#[derive(Debug, Default)]
pub struct Bind;

impl Worker for Bind {
    fn name(&self) -> &str {
        "bind"
    }

    fn priority(&self) -> i32 {
        7
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let argument = instruction
            .argument
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                Error::syntax(format!(
                    "`{}` needs an attribute argument",
                    instruction.attribute.name
                ))
            })?;
        let reference = Reference::parse(instruction.value().unwrap_or_default().trim())?;
        let modifiers = Modifiers::parse(&instruction.modifiers, SCHEMA)?;
        let document = runtime.document();
        let root = scope.root();
        let key = &instruction.attribute.name;
        let slot = document.ext_or_insert_with(root, BindSlot::default);

        let Some(droplet) = reference.droplet(document, scope) else {
            let stale = slot.0.borrow_mut().remove(key);
            if let Some(binding) = stale {
                binding.release(document, root)?;
            }
            return Ok(Flow::Continue);
        };
        let signal = reference.signal(&droplet)?;
        let stale = {
            let mut bindings = slot.0.borrow_mut();
            if bindings.get(key).is_some_and(|b| b.bound.signal.ptr_eq(&signal)) {
                return Ok(Flow::Continue);
            }
            bindings.remove(key)
        };
        if let Some(binding) = stale {
            binding.release(document, root)?;
        }

        let name = if modifiers.has("camel") {
            camel_case(argument)
        } else {
            argument.to_owned()
        };
        let base = if modifiers.has("preserve") {
            document.get_attribute(root, &name)
        } else {
            None
        };

        let weak = document.downgrade();
        let (n, b) = (name.clone(), base.clone());
        let subscription = watch(&signal, move |value| {
            apply(&weak, root, &n, b.as_deref(), value);
        });
        slot.0.borrow_mut().insert(
            key.clone(),
            Binding {
                bound: Bound::new(signal, subscription),
                name,
                base,
            },
        );
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let document = runtime.document();
        let root = scope.root();
        let Some(slot) = document.ext::<BindSlot>(root) else {
            return Ok(Flow::Continue);
        };
        let stale = slot.0.borrow_mut().remove(&instruction.attribute.name);
        if let Some(binding) = stale {
            binding.release(document, root)?;
        }
        Ok(Flow::Continue)
    }
}
