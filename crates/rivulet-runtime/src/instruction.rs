#![forbid(unsafe_code)]

//! Instructions and the worker table.
//!
//! A [`Worker`] is the mount/unmount handler pair for one instruction name.
//! Workers are kept in an [`InstructionTable`] keyed by bare name (the
//! configured prefix is not part of the key), and the table supplies the
//! priority order in which instructions on one element are applied.
//!
//! # Invariants
//!
//! 1. [`InstructionTable::sort`] is stable: equal priorities keep
//!    encounter order.
//! 2. Instructions without a registered worker sort as priority 0 and are
//!    ignored by the visitor.
//! 3. Registering a name twice replaces the previous worker.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use rivulet_core::Attribute;

use crate::error::Result;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::Opcode;

/// One recognized attribute, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Bare name, prefix stripped (`on` for `x-on:click`).
    pub name: String,
    pub argument: Option<String>,
    pub modifiers: Vec<String>,
    /// The source attribute. `value` is `None` when it was just removed.
    pub attribute: Attribute,
}

impl Instruction {
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.attribute.value.as_deref()
    }

    /// Whitespace-separated tokens of the value, first occurrence only.
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = Vec::new();
        for token in self.value().unwrap_or_default().split_whitespace() {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }
}

/// Whether traversal continues past the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Skip the remaining instructions of this element and its subtree.
    Skip,
}

pub trait Worker {
    fn name(&self) -> &str;

    /// Ascending execution order among instructions on one element.
    fn priority(&self) -> i32;

    /// The instruction is present (opcode `Mount` or `Mutate`).
    fn mount(
        &self,
        runtime: &Runtime,
        opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow>;

    /// The instruction was removed, or its subtree is being torn down.
    fn unmount(&self, runtime: &Runtime, instruction: &Instruction, scope: &Scope)
    -> Result<Flow>;
}

type MountFn = dyn Fn(&Runtime, Opcode, &Instruction, &Scope) -> Result<Flow>;
type UnmountFn = dyn Fn(&Runtime, &Instruction, &Scope) -> Result<Flow>;

/// A worker assembled from closures.
///
/// ```ignore
/// let worker = FnWorker::new("log", 9)
///     .on_mount(|_, opcode, i, _| { println!("{opcode:?} {}", i.name); Ok(Flow::Continue) });
/// runtime.instruction(worker)?;
/// ```
pub struct FnWorker {
    name: String,
    priority: i32,
    mount: Box<MountFn>,
    unmount: Box<UnmountFn>,
}

impl fmt::Debug for FnWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorker")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl FnWorker {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            mount: Box::new(|_, _, _, _| Ok(Flow::Continue)),
            unmount: Box::new(|_, _, _| Ok(Flow::Continue)),
        }
    }

    #[must_use]
    pub fn on_mount(
        mut self,
        f: impl Fn(&Runtime, Opcode, &Instruction, &Scope) -> Result<Flow> + 'static,
    ) -> Self {
        self.mount = Box::new(f);
        self
    }

    #[must_use]
    pub fn on_unmount(
        mut self,
        f: impl Fn(&Runtime, &Instruction, &Scope) -> Result<Flow> + 'static,
    ) -> Self {
        self.unmount = Box::new(f);
        self
    }
}

impl Worker for FnWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn mount(
        &self,
        runtime: &Runtime,
        opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        (self.mount)(runtime, opcode, instruction, scope)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        (self.unmount)(runtime, instruction, scope)
    }
}

#[derive(Default)]
pub struct InstructionTable {
    workers: RefCell<AHashMap<String, Rc<dyn Worker>>>,
}

impl fmt::Debug for InstructionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("InstructionTable")
            .field("workers", &names)
            .finish()
    }
}

impl InstructionTable {
    /// Register `worker`, returning the worker it replaced.
    pub fn register(&self, worker: Rc<dyn Worker>) -> Option<Rc<dyn Worker>> {
        let name = worker.name().to_owned();
        self.workers.borrow_mut().insert(name, worker)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<dyn Worker>> {
        self.workers.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn priority(&self, name: &str) -> i32 {
        self.workers
            .borrow()
            .get(name)
            .map_or(0, |w| w.priority())
    }

    /// Stable sort by worker priority.
    pub fn sort(&self, instructions: &mut [Instruction]) {
        let workers = self.workers.borrow();
        instructions.sort_by_key(|i| workers.get(&i.name).map_or(0, |w| w.priority()));
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.workers.borrow().keys().cloned().collect()
    }
}
