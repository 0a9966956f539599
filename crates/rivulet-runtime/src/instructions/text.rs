#![forbid(unsafe_code)]

//! `x-text="c::value"`: keep the element's text in sync with a value.

use std::cell::RefCell;

use tracing::warn;

use crate::error::Result;
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::{Bound, Reference};
use crate::reactive::watch;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::Opcode;

#[derive(Default)]
struct TextSlot(RefCell<Option<Bound>>);

#[derive(Debug, Default)]
pub struct Text;

impl Worker for Text {
    fn name(&self) -> &str {
        "text"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let value = instruction.value().unwrap_or_default().trim();
        if value.is_empty() {
            return self.unmount(runtime, instruction, scope);
        }
        let reference = Reference::parse(value)?;
        let document = runtime.document();
        let root = scope.root();
        let slot = document.ext_or_insert_with(root, TextSlot::default);

        let Some(droplet) = reference.droplet(document, scope) else {
            slot.0.borrow_mut().take();
            return Ok(Flow::Continue);
        };
        let signal = reference.signal(&droplet)?;
        if slot.0.borrow().as_ref().is_some_and(|b| b.signal.ptr_eq(&signal)) {
            return Ok(Flow::Continue);
        }

        let weak = document.downgrade();
        let subscription = watch(&signal, move |value| {
            let Some(document) = weak.upgrade() else {
                return;
            };
            if let Err(err) = document.set_text_content(root, &value.display()) {
                warn!(element = root.raw(), error = %err, "text update failed");
            }
        });
        *slot.0.borrow_mut() = Some(Bound::new(signal, subscription));
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        if let Some(slot) = runtime.document().ext::<TextSlot>(scope.root()) {
            slot.0.borrow_mut().take();
        }
        Ok(Flow::Continue)
    }
}
