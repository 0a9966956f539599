#![forbid(unsafe_code)]

//! `x-html="c::value"`: replace the element's children with parsed markup.
//!
//! The replaced and inserted children surface as ordinary child-list
//! mutations and are reconciled with the next batch.

use std::cell::RefCell;

use tracing::warn;

use crate::error::Result;
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::{Bound, Reference};
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::Opcode;

#[derive(Default)]
struct HtmlSlot(RefCell<Option<Bound>>);

#[derive(Debug, Default)]
pub struct Html;

impl Worker for Html {
    fn name(&self) -> &str {
        "html"
    }

    fn priority(&self) -> i32 {
        6
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
        let slot = document.ext_or_insert_with(root, HtmlSlot::default);

        let Some(droplet) = reference.droplet(document, scope) else {
            slot.0.borrow_mut().take();
            return Ok(Flow::Continue);
        };
        let signal = reference.signal(&droplet)?;
        if slot.0.borrow().as_ref().is_some_and(|b| b.signal.ptr_eq(&signal)) {
            return Ok(Flow::Continue);
        }
        slot.0.borrow_mut().take();

        // Markup is parsed in the element's context and always recovers.
        document.set_inner_html(root, &signal.with(|v| v.display()))?;
        let weak = document.downgrade();
        let subscription = signal.subscribe(move |value| {
            let Some(document) = weak.upgrade() else {
                return;
            };
            if let Err(err) = document.set_inner_html(root, &value.display()) {
                warn!(element = root.raw(), error = %err, "html update failed");
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
        if let Some(slot) = runtime.document().ext::<HtmlSlot>(scope.root()) {
            slot.0.borrow_mut().take();
        }
        Ok(Flow::Continue)
    }
}
