#![forbid(unsafe_code)]

//! The runtime handle.
//!
//! A [`Runtime`] binds one [`Document`] to an instruction table, a
//! controller registry, a scheduler and a mutation observer. It is a cheap
//! `Rc` handle; clones share all state. Everything runs on the thread that
//! created it.
//!
//! # Example
//!
//! ```ignore
//! let document = Document::new();
//! document.set_inner_html(document.body(), r#"<p x-controller="greeter" x-text="greeter::name"></p>"#)?;
//!
//! let runtime = Runtime::new(document.clone());
//! runtime.register("greeter", |_root| {
//!     provide("name", "world")?;
//!     Ok(())
//! })?;
//! runtime.observe(document.body())?;
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rivulet_core::{Attribute, Document, MutationObserver, NodeId};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::instruction::{InstructionTable, Worker};
use crate::instructions;
use crate::observer::ObserverState;
use crate::registry::{ControllerRecord, Registry};
use crate::scheduler::Scheduler;
use crate::scope::Scope;
use crate::timer::Timers;

pub(crate) struct RuntimeInner {
    pub(crate) document: Document,
    pub(crate) observer: MutationObserver,
    pub(crate) config: RefCell<Config>,
    pub(crate) instructions: InstructionTable,
    pub(crate) registry: Registry,
    pub(crate) scheduler: Scheduler,
    pub(crate) timers: Rc<Timers>,
    pub(crate) idle: Cell<bool>,
    pub(crate) state: RefCell<ObserverState>,
}

#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("prefix", &self.prefix())
            .field("idle", &self.is_idle())
            .field("roots", &self.roots())
            .field("instructions", &self.inner.instructions)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// A runtime with the default configuration and the built-in workers.
    #[must_use]
    pub fn new(document: Document) -> Self {
        let observer = document.mutation_observer();
        let inner = Rc::new(RuntimeInner {
            document,
            observer,
            config: RefCell::new(Config::default()),
            instructions: InstructionTable::default(),
            registry: Registry::default(),
            scheduler: Scheduler::default(),
            timers: Rc::default(),
            idle: Cell::new(true),
            state: RefCell::new(ObserverState::default()),
        });
        instructions::install(&inner.instructions);

        let weak: Weak<RuntimeInner> = Rc::downgrade(&inner);
        inner.registry.listen(move |record| match weak.upgrade() {
            Some(inner) => Runtime { inner }.mount_registered(record),
            None => Ok(()),
        });
        Self { inner }
    }

    pub fn with_config(document: Document, config: Config) -> Result<Self> {
        let runtime = Self::new(document);
        runtime.configure(config)?;
        Ok(runtime)
    }

    /// Replace the configuration. Only legal while idle.
    pub fn configure(&self, config: Config) -> Result<()> {
        self.require_idle("configure")?;
        config.validate()?;
        *self.inner.config.borrow_mut() = config;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.config.borrow().clone()
    }

    #[must_use]
    pub fn prefix(&self) -> String {
        self.inner.config.borrow().prefix.clone()
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// `false` while a traversal or hook drain is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.idle.get()
    }

    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.state.borrow().roots.clone()
    }

    /// The scope attached to `node`, if it carries instructions.
    #[must_use]
    pub fn scope_of(&self, node: NodeId) -> Option<Scope> {
        Scope::of(&self.inner.document, node)
    }

    /// Queue a task for the end of the next tick, after controller hooks.
    pub fn immediate(&self, task: impl FnOnce() -> Result<()> + 'static) {
        self.inner.scheduler.immediate(task);
    }

    /// Register a controller factory and mount any element already
    /// referencing `name` inside an observed root.
    pub fn register(
        &self,
        name: &str,
        factory: impl Fn(NodeId) -> Result<()> + 'static,
    ) -> Result<Rc<ControllerRecord>> {
        self.require_idle("register")?;
        self.inner
            .registry
            .register(ControllerRecord::new(name, factory))
    }

    /// Register (or replace) an instruction worker; returns the worker it
    /// replaced. Only legal while idle.
    pub fn instruction(&self, worker: impl Worker + 'static) -> Result<Option<Rc<dyn Worker>>> {
        self.require_idle("register an instruction")?;
        Ok(self.inner.instructions.register(Rc::new(worker)))
    }

    #[must_use]
    pub fn instructions(&self) -> &InstructionTable {
        &self.inner.instructions
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn timers(&self) -> &Rc<Timers> {
        &self.inner.timers
    }

    pub(crate) fn require_idle(&self, operation: &str) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(Error::state(format!("cannot {operation} while a tick is running")))
        }
    }

    /// Removed-attribute placeholders recorded for `element`, drained.
    pub(crate) fn take_removed(&self, element: NodeId) -> Vec<Attribute> {
        self.inner
            .state
            .borrow_mut()
            .removed
            .remove(&element)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
