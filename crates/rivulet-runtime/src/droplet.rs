#![forbid(unsafe_code)]

//! Controller instances.
//!
//! A [`Droplet`] is created the first time an element's controller
//! instruction binds a registered controller name, and lives as long as the
//! element keeps it in its controller map. It owns the values the controller
//! provides and three hook lists (setup, mount, unmount).
//!
//! # Invariants
//!
//! 1. A value name is provided at most once per droplet.
//! 2. Hook lists keep registration order; running a list iterates a
//!    snapshot, so hooks added while it runs wait for the next run.
//! 3. A `once` hook is removed right after it returns successfully.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use rivulet_core::NodeId;

use crate::error::{Error, Result};
use crate::registry::ControllerRecord;
use crate::value::{Signal, Value};

/// Result of a mount hook.
pub enum Mounted {
    Done,
    /// Registered as a one-shot unmount hook.
    Teardown(Box<dyn FnOnce() -> Result<()>>),
}

impl Mounted {
    pub fn teardown(f: impl FnOnce() -> Result<()> + 'static) -> Self {
        Self::Teardown(Box::new(f))
    }
}

impl From<()> for Mounted {
    fn from((): ()) -> Self {
        Self::Done
    }
}

impl fmt::Debug for Mounted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Teardown(_) => f.write_str("Teardown(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookOptions {
    pub once: bool,
}

impl HookOptions {
    pub const ONCE: Self = Self { once: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Setup,
    Mount,
    Unmount,
}

pub(crate) type HookFn = Rc<RefCell<dyn FnMut() -> Result<Mounted>>>;

#[derive(Clone)]
pub(crate) struct Hook {
    pub(crate) id: u64,
    pub(crate) once: bool,
    pub(crate) callback: HookFn,
}

struct DropletInner {
    root: NodeId,
    record: Rc<ControllerRecord>,
    mounted: Cell<bool>,
    values: RefCell<AHashMap<String, Signal>>,
    setup: RefCell<Vec<Hook>>,
    mount: RefCell<Vec<Hook>>,
    unmount: RefCell<Vec<Hook>>,
    next_hook: Cell<u64>,
}

/// A live controller bound to one element under one name.
#[derive(Clone)]
pub struct Droplet {
    inner: Rc<DropletInner>,
}

impl fmt::Debug for Droplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Droplet")
            .field("name", &self.name())
            .field("root", &self.inner.root)
            .field("mounted", &self.inner.mounted.get())
            .field("values", &self.inner.values.borrow().len())
            .finish()
    }
}

impl Droplet {
    pub(crate) fn new(record: Rc<ControllerRecord>, root: NodeId) -> Self {
        Self {
            inner: Rc::new(DropletInner {
                root,
                record,
                mounted: Cell::new(false),
                values: RefCell::new(AHashMap::new()),
                setup: RefCell::new(Vec::new()),
                mount: RefCell::new(Vec::new()),
                unmount: RefCell::new(Vec::new()),
                next_hook: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.root
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.record.name
    }

    pub(crate) fn record(&self) -> &Rc<ControllerRecord> {
        &self.inner.record
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub(crate) fn set_mounted(&self, mounted: bool) {
        self.inner.mounted.set(mounted);
    }

    /// The signal provided under `name`, if any.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Signal> {
        self.inner.values.borrow().get(name).cloned()
    }

    pub(crate) fn provide(&self, name: &str, initial: Value) -> Result<Signal> {
        let mut values = self.inner.values.borrow_mut();
        if values.contains_key(name) {
            return Err(Error::usage(format!(
                "value `{name}` is already provided by controller `{}`",
                self.name()
            )));
        }
        let signal = Signal::new(initial);
        values.insert(name.to_owned(), signal.clone());
        Ok(signal)
    }

    fn hooks(&self, kind: HookKind) -> &RefCell<Vec<Hook>> {
        match kind {
            HookKind::Setup => &self.inner.setup,
            HookKind::Mount => &self.inner.mount,
            HookKind::Unmount => &self.inner.unmount,
        }
    }

    pub(crate) fn add_hook(&self, kind: HookKind, once: bool, callback: HookFn) -> u64 {
        let id = self.inner.next_hook.get();
        self.inner.next_hook.set(id + 1);
        self.hooks(kind).borrow_mut().push(Hook { id, once, callback });
        id
    }

    pub(crate) fn snapshot(&self, kind: HookKind) -> Vec<Hook> {
        self.hooks(kind).borrow().clone()
    }

    pub(crate) fn remove_hook(&self, kind: HookKind, id: u64) {
        self.hooks(kind).borrow_mut().retain(|h| h.id != id);
    }

    #[must_use]
    pub fn hook_count(&self, kind: HookKind) -> usize {
        self.hooks(kind).borrow().len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
