#![forbid(unsafe_code)]

//! Deferred hook tasks.
//!
//! Two ordered buckets: controller tasks (droplet setup/mount/unmount hook
//! runs queued during traversal) and immediate tasks (queued by application
//! code, outside any controller). One [`Scheduler::tick`] runs after each
//! traversal: controller tasks first, then immediate tasks, both in
//! insertion order.
//!
//! # Invariants
//!
//! 1. A tick drains a snapshot of each bucket. Controller tasks queued
//!    while controller tasks run are dropped with the tick; immediate tasks
//!    queued before the immediate snapshot run in the same tick.
//! 2. Both buckets are empty when `tick` returns, successfully or not,
//!    once the owner calls [`Scheduler::clear`].

use std::cell::RefCell;
use std::fmt;

use crate::error::Result;

pub type Task = Box<dyn FnOnce() -> Result<()>>;

#[derive(Default)]
pub struct Scheduler {
    controller: RefCell<Vec<Task>>,
    immediate: RefCell<Vec<Task>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("controller", &self.controller.borrow().len())
            .field("immediate", &self.immediate.borrow().len())
            .finish()
    }
}

impl Scheduler {
    pub fn controller(&self, task: impl FnOnce() -> Result<()> + 'static) {
        self.controller.borrow_mut().push(Box::new(task));
    }

    pub fn immediate(&self, task: impl FnOnce() -> Result<()> + 'static) {
        self.immediate.borrow_mut().push(Box::new(task));
    }

    /// Run queued tasks. The first failing task aborts the tick.
    pub fn tick(&self) -> Result<()> {
        let controller = std::mem::take(&mut *self.controller.borrow_mut());
        for task in controller {
            task()?;
        }
        let immediate = std::mem::take(&mut *self.immediate.borrow_mut());
        for task in immediate {
            task()?;
        }
        self.clear();
        Ok(())
    }

    pub fn clear(&self) {
        self.controller.borrow_mut().clear();
        self.immediate.borrow_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.controller.borrow().len() + self.immediate.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
