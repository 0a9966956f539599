#![forbid(unsafe_code)]

//! Controller registry.
//!
//! Maps controller names to factories and notifies listeners on every
//! registration, which is how the runtime mounts elements that referenced a
//! controller before it existed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use rivulet_core::NodeId;

use crate::error::{Error, Result};

pub type Factory = dyn Fn(NodeId) -> Result<()>;

/// A registered controller: its name and the factory run once per droplet
/// with the droplet's root element.
pub struct ControllerRecord {
    pub name: String,
    factory: Box<Factory>,
}

impl fmt::Debug for ControllerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRecord")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ControllerRecord {
    pub fn new(name: impl Into<String>, factory: impl Fn(NodeId) -> Result<()> + 'static) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
        }
    }

    pub fn instantiate(&self, root: NodeId) -> Result<()> {
        (self.factory)(root)
    }
}

type Listener = Rc<dyn Fn(&Rc<ControllerRecord>) -> Result<()>>;

#[derive(Default)]
pub struct Registry {
    records: RefCell<AHashMap<String, Rc<ControllerRecord>>>,
    listeners: RefCell<Vec<Listener>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.records.borrow().len())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl Registry {
    /// Insert (or replace) a record, then notify listeners in order.
    /// The first listener error is returned after the record is stored.
    pub fn register(&self, record: ControllerRecord) -> Result<Rc<ControllerRecord>> {
        if record.name.is_empty() || record.name.contains(char::is_whitespace) {
            return Err(Error::usage(format!(
                "controller name {:?} must be a non-empty token",
                record.name
            )));
        }
        let record = Rc::new(record);
        self.records
            .borrow_mut()
            .insert(record.name.clone(), Rc::clone(&record));
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&record)?;
        }
        Ok(record)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<ControllerRecord>> {
        self.records.borrow().get(name).cloned()
    }

    /// Called after every registration.
    pub fn listen(&self, listener: impl Fn(&Rc<ControllerRecord>) -> Result<()> + 'static) {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn register_notifies_listeners_and_overwrites() {
        let registry = Registry::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        registry.listen(move |r| {
            s.borrow_mut().push(r.name.clone());
            Ok(())
        });
        let first = registry.register(ControllerRecord::new("a", |_| Ok(()))).unwrap();
        let second = registry.register(ControllerRecord::new("a", |_| Ok(()))).unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&registry.get("a").unwrap(), &second));
        assert_eq!(*seen.borrow(), vec!["a", "a"]);
    }

    #[test]
    fn rejects_names_that_cannot_be_tokens() {
        let registry = Registry::default();
        for bad in ["", "a b"] {
            assert!(registry.register(ControllerRecord::new(bad, |_| Ok(()))).is_err());
        }
    }

    #[test]
    fn listener_error_is_reported_after_storing() {
        let registry = Registry::default();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        registry.listen(move |_| {
            c.set(c.get() + 1);
            Err(Error::callback("boom"))
        });
        assert!(registry.register(ControllerRecord::new("x", |_| Ok(()))).is_err());
        assert!(registry.get("x").is_some());
        assert_eq!(calls.get(), 1);
    }
}
