#![forbid(unsafe_code)]

//! Per-element scopes.
//!
//! A scope is attached to every element that carries at least one
//! instruction. It holds the controllers bound on that element and the
//! subtree ignore flag. The parent scope is never stored: it is looked up
//! through the live tree each time, so a detached element does not keep its
//! former ancestors' scopes alive.
//!
//! # Invariants
//!
//! 1. Controller lookup checks the local map first, then each ancestor
//!    scope; a local entry shadows ancestors without touching them.
//! 2. The chain is whatever the tree says right now: adding a controller to
//!    an ancestor, or moving the element under one, is visible on the next
//!    lookup without touching this scope.
//! 3. At most one scope is attached per element, and it is reused.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use rivulet_core::{Document, NodeId};

use crate::droplet::Droplet;

struct ScopeInner {
    root: NodeId,
    controllers: RefCell<AHashMap<String, Droplet>>,
    ignore: Cell<bool>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.local_controllers();
        names.sort();
        f.debug_struct("Scope")
            .field("root", &self.inner.root)
            .field("controllers", &names)
            .field("ignore", &self.inner.ignore.get())
            .finish()
    }
}

impl Scope {
    fn new(root: NodeId) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                root,
                controllers: RefCell::new(AHashMap::new()),
                ignore: Cell::new(false),
            }),
        }
    }

    /// Attach a scope to `element`, or return the one already attached.
    pub fn attach(document: &Document, element: NodeId) -> Self {
        if let Some(existing) = Self::of(document, element) {
            return existing;
        }
        let scope = Self::new(element);
        document.set_ext(element, Rc::clone(&scope.inner));
        scope
    }

    /// The scope attached to `element` itself.
    #[must_use]
    pub fn of(document: &Document, element: NodeId) -> Option<Self> {
        document
            .ext::<ScopeInner>(element)
            .map(|inner| Self { inner })
    }

    /// The nearest scope at `element` or above it.
    #[must_use]
    pub fn closest(document: &Document, element: NodeId) -> Option<Self> {
        let mut cursor = Some(element);
        while let Some(current) = cursor {
            if let Some(scope) = Self::of(document, current) {
                return Some(scope);
            }
            cursor = document.parent_element(current);
        }
        None
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.root
    }

    /// Derived from the live tree on every call.
    #[must_use]
    pub fn parent(&self, document: &Document) -> Option<Self> {
        let parent = document.parent_element(self.inner.root)?;
        Self::closest(document, parent)
    }

    /// Resolve a controller by name through the chain.
    #[must_use]
    pub fn controller(&self, document: &Document, name: &str) -> Option<Droplet> {
        if let Some(local) = self.inner.controllers.borrow().get(name) {
            return Some(local.clone());
        }
        self.parent(document)?.controller(document, name)
    }

    pub fn insert_controller(&self, droplet: Droplet) {
        self.inner
            .controllers
            .borrow_mut()
            .insert(droplet.name().to_owned(), droplet);
    }

    /// Remove the local entry for `name`, leaving ancestors untouched.
    pub fn remove_controller(&self, name: &str) -> Option<Droplet> {
        self.inner.controllers.borrow_mut().remove(name)
    }

    #[must_use]
    pub fn local_controllers(&self) -> Vec<String> {
        self.inner.controllers.borrow().keys().cloned().collect()
    }

    /// The local ignore flag.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.inner.ignore.get()
    }

    pub fn set_ignore(&self, ignore: bool) {
        self.inner.ignore.set(ignore);
    }

    /// Whether this scope or any scope above it is ignored.
    #[must_use]
    pub fn within_ignored(&self, document: &Document) -> bool {
        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            if scope.is_ignored() {
                return true;
            }
            cursor = scope.parent(document);
        }
        false
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::droplet::Droplet;
    use crate::registry::ControllerRecord;

    fn chain(doc: &Document) -> (NodeId, NodeId, NodeId) {
        let outer = doc.create_element("div");
        let middle = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(doc.body(), outer).unwrap();
        doc.append_child(outer, middle).unwrap();
        doc.append_child(middle, inner).unwrap();
        (outer, middle, inner)
    }

    fn droplet(name: &str, root: NodeId) -> Droplet {
        Droplet::new(Rc::new(ControllerRecord::new(name, |_| Ok(()))), root)
    }

    #[test]
    fn elements_without_scope_forward_to_ancestor() {
        let doc = Document::new();
        let (outer, middle, inner) = chain(&doc);
        let top = Scope::attach(&doc, outer);
        let found = Scope::closest(&doc, inner).unwrap();
        assert!(found.ptr_eq(&top));
        assert!(Scope::of(&doc, middle).is_none());
    }

    #[test]
    fn local_binding_shadows_without_mutating_ancestor() {
        let doc = Document::new();
        let (outer, _, inner) = chain(&doc);
        let top = Scope::attach(&doc, outer);
        let low = Scope::attach(&doc, inner);

        let a = droplet("c", outer);
        let b = droplet("c", inner);
        top.insert_controller(a.clone());
        assert!(low.controller(&doc, "c").unwrap().ptr_eq(&a));

        low.insert_controller(b.clone());
        assert!(low.controller(&doc, "c").unwrap().ptr_eq(&b));
        assert!(top.controller(&doc, "c").unwrap().ptr_eq(&a));

        low.remove_controller("c");
        assert!(low.controller(&doc, "c").unwrap().ptr_eq(&a));
        top.remove_controller("c");
        assert!(low.controller(&doc, "c").is_none());
    }

    #[test]
    fn parent_follows_the_live_tree() {
        let doc = Document::new();
        let (outer, middle, inner) = chain(&doc);
        let top = Scope::attach(&doc, outer);
        let low = Scope::attach(&doc, inner);
        assert!(low.parent(&doc).unwrap().ptr_eq(&top));

        doc.remove(middle).unwrap();
        assert!(low.parent(&doc).is_none());
    }

    #[test]
    fn ancestor_scopes_created_later_are_seen() {
        let doc = Document::new();
        let (outer, _, inner) = chain(&doc);
        let low = Scope::attach(&doc, inner);
        assert!(low.parent(&doc).is_none());

        let top = Scope::attach(&doc, outer);
        top.insert_controller(droplet("c", outer));
        assert!(low.parent(&doc).unwrap().ptr_eq(&top));
        assert_eq!(low.controller(&doc, "c").unwrap().name(), "c");
    }

    #[test]
    fn moving_under_a_scoped_element_joins_its_chain() {
        let doc = Document::new();
        let (outer, middle, inner) = chain(&doc);
        let host = doc.create_element("section");
        doc.append_child(doc.body(), host).unwrap();
        let top = Scope::attach(&doc, host);
        top.insert_controller(droplet("c", host));
        let low = Scope::attach(&doc, inner);
        assert!(Scope::of(&doc, outer).is_none());
        assert!(low.controller(&doc, "c").is_none());

        doc.append_child(host, middle).unwrap();
        assert!(low.controller(&doc, "c").is_some());
    }

    #[test]
    fn attach_reuses_existing_scope() {
        let doc = Document::new();
        let (outer, ..) = chain(&doc);
        let first = Scope::attach(&doc, outer);
        let again = Scope::attach(&doc, outer);
        assert!(first.ptr_eq(&again));
    }

    #[test]
    fn ignore_is_inherited_through_the_chain() {
        let doc = Document::new();
        let (outer, _, inner) = chain(&doc);
        let top = Scope::attach(&doc, outer);
        let low = Scope::attach(&doc, inner);
        top.set_ignore(true);
        assert!(!low.is_ignored());
        assert!(low.within_ignored(&doc));
    }
}
