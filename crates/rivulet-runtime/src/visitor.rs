#![forbid(unsafe_code)]

//! Subtree traversal.
//!
//! [`traverse`] walks an element and its element descendants in document
//! order (parent before children). For each element, [`visit`] resolves the
//! element's instructions, attaches a scope if there are any, and hands each
//! instruction to its worker in priority order.
//!
//! A worker returning [`Flow::Skip`] stops the remaining instructions on that
//! element and prunes its subtree. The flag is a return value, so a skip in
//! one branch never leaks into a sibling.

use rivulet_core::NodeId;
use tracing::trace;

use crate::attribute;
use crate::error::Result;
use crate::instruction::Flow;
use crate::runtime::Runtime;
use crate::scope::Scope;

/// The kind of pass applied to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Mount,
    Unmount,
    /// An instruction attribute changed on a live element.
    Mutate,
}

/// Outcome of visiting one element.
#[derive(Debug, Clone)]
pub struct Visit {
    /// The scope descendants inherit.
    pub scope: Option<Scope>,
    pub flow: Flow,
}

/// Apply every instruction on `element`.
pub fn visit(
    runtime: &Runtime,
    opcode: Opcode,
    element: NodeId,
    scope: Option<&Scope>,
) -> Result<Visit> {
    let document = runtime.document();
    let prefix = runtime.prefix();
    let live = attribute::filter(&document.attributes(element), &prefix);
    let mut instructions = attribute::parse(&live, &prefix);
    instructions.extend(attribute::parse(&runtime.take_removed(element), &prefix));

    if instructions.is_empty() {
        return Ok(Visit {
            scope: scope.cloned(),
            flow: Flow::Continue,
        });
    }

    let attached = Scope::attach(document, element);
    runtime.instructions().sort(&mut instructions);

    for instruction in &instructions {
        let Some(worker) = runtime.instructions().get(&instruction.name) else {
            continue;
        };
        let present = instruction.value().is_some();
        trace!(
            element = element.raw(),
            instruction = %instruction.attribute.name,
            ?opcode,
            present,
            "dispatch"
        );
        let flow = if opcode != Opcode::Unmount && present {
            worker.mount(runtime, opcode, instruction, &attached)?
        } else {
            worker.unmount(runtime, instruction, &attached)?
        };
        if flow == Flow::Skip {
            return Ok(Visit {
                scope: Some(attached),
                flow,
            });
        }
    }

    Ok(Visit {
        scope: Some(attached),
        flow: Flow::Continue,
    })
}

/// Visit `element`, then its element children with the resulting scope.
pub fn traverse(
    runtime: &Runtime,
    opcode: Opcode,
    element: NodeId,
    scope: Option<&Scope>,
) -> Result<()> {
    let Visit { scope, flow } = visit(runtime, opcode, element, scope)?;
    if flow == Flow::Skip {
        return Ok(());
    }
    let document = runtime.document();
    for child in document.children(element) {
        // A worker may have moved the child since the snapshot.
        if document.parent_element(child) != Some(element) {
            continue;
        }
        traverse(runtime, opcode, child, scope.as_ref())?;
    }
    Ok(())
}
