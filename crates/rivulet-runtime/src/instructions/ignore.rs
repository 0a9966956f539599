#![forbid(unsafe_code)]

//! `x-ignore`: opt a subtree out of reconciliation.

use crate::error::Result;
use crate::instruction::{Flow, Instruction, Worker};
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::{Opcode, traverse};

#[derive(Debug, Default)]
pub struct Ignore;

impl Worker for Ignore {
    fn name(&self) -> &str {
        "ignore"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn mount(
        &self,
        runtime: &Runtime,
        opcode: Opcode,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        // Added to a live element: tear down what is already mounted below.
        if opcode == Opcode::Mutate {
            let parent = scope.parent(runtime.document());
            traverse(runtime, Opcode::Unmount, scope.root(), parent.as_ref())?;
        }
        scope.set_ignore(true);
        Ok(Flow::Skip)
    }

    fn unmount(
        &self,
        _runtime: &Runtime,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        scope.set_ignore(false);
        Ok(Flow::Continue)
    }
}
