#![forbid(unsafe_code)]

//! Mutation observation.
//!
//! An observer registers subtree roots and accumulates [`MutationRecord`]s
//! for changes inside them. Records are only delivered on demand through
//! [`MutationObserver::take_records`]; there is no callback delivery, so the
//! owner decides when a batch is reconciled.
//!
//! A node removed from an observed subtree keeps being reported (as a
//! transient root) until the next `take_records`, so changes made to a
//! freshly detached subtree in the same batch are not lost.

use ahash::AHashSet;

use crate::dom::{Document, NodeId, Tree};
use crate::error::{DomError, Result};

/// One DOM change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    Attributes {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
}

impl MutationRecord {
    #[must_use]
    pub fn target(&self) -> NodeId {
        match self {
            Self::Attributes { target, .. } | Self::ChildList { target, .. } => *target,
        }
    }
}

pub(crate) struct ObserverSlot {
    id: u64,
    roots: Vec<NodeId>,
    transient: Vec<NodeId>,
    records: Vec<MutationRecord>,
}

impl Tree {
    fn interested(&self, slot: &ObserverSlot, target: NodeId) -> bool {
        slot.roots
            .iter()
            .chain(slot.transient.iter())
            .any(|root| self.contains(*root, target))
    }

    fn interested_slots(&self, target: NodeId) -> Vec<usize> {
        self.observers
            .iter()
            .enumerate()
            .filter(|(_, slot)| self.interested(slot, target))
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn record(&mut self, record: MutationRecord) {
        let slots = self.interested_slots(record.target());
        #[cfg(feature = "tracing")]
        tracing::trace!(?record, observers = slots.len(), "mutation record queued");
        for i in slots {
            self.observers[i].records.push(record.clone());
        }
    }

    /// `node` is about to leave `parent`: keep reporting its subtree.
    pub(crate) fn register_transient(&mut self, parent: NodeId, node: NodeId) {
        let slots = self.interested_slots(parent);
        for i in slots {
            let transient = &mut self.observers[i].transient;
            if !transient.contains(&node) {
                transient.push(node);
            }
        }
    }

    /// Drop `freed` nodes from every observer's roots and transient set.
    pub(crate) fn forget_observed(&mut self, freed: &AHashSet<NodeId>) {
        for slot in &mut self.observers {
            slot.roots.retain(|n| !freed.contains(n));
            slot.transient.retain(|n| !freed.contains(n));
        }
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut ObserverSlot> {
        self.observers.iter_mut().find(|s| s.id == id)
    }
}

/// Handle to one observer registered on a [`Document`].
///
/// Dropping the handle unregisters the observer.
pub struct MutationObserver {
    id: u64,
    document: Document,
}

impl std::fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver")
            .field("id", &self.id)
            .field("roots", &self.roots())
            .finish()
    }
}

impl Document {
    /// Register a new observer with no roots.
    #[must_use]
    pub fn mutation_observer(&self) -> MutationObserver {
        let mut tree = self.tree.borrow_mut();
        let id = tree.next_observer;
        tree.next_observer += 1;
        tree.observers.push(ObserverSlot {
            id,
            roots: Vec::new(),
            transient: Vec::new(),
            records: Vec::new(),
        });
        MutationObserver {
            id,
            document: self.clone(),
        }
    }
}

impl MutationObserver {
    /// Observe the subtree rooted at `root` (attributes and child lists).
    /// Observing the same root twice is a no-op.
    pub fn observe(&self, root: NodeId) -> Result<()> {
        let mut tree = self.document.tree.borrow_mut();
        tree.element(root)?;
        let slot = tree.slot_mut(self.id).ok_or(DomError::UnknownNode(root))?;
        if !slot.roots.contains(&root) {
            slot.roots.push(root);
        }
        Ok(())
    }

    /// Stop observing `root`. Already queued records are kept.
    pub fn unobserve(&self, root: NodeId) {
        let mut tree = self.document.tree.borrow_mut();
        if let Some(slot) = tree.slot_mut(self.id) {
            slot.roots.retain(|r| *r != root);
        }
    }

    /// Stop observing everything and discard queued records.
    pub fn disconnect(&self) {
        let mut tree = self.document.tree.borrow_mut();
        if let Some(slot) = tree.slot_mut(self.id) {
            slot.roots.clear();
            slot.transient.clear();
            slot.records.clear();
        }
    }

    /// Drain queued records, oldest first.
    pub fn take_records(&self) -> Vec<MutationRecord> {
        let mut tree = self.document.tree.borrow_mut();
        match tree.slot_mut(self.id) {
            Some(slot) => {
                slot.transient.clear();
                std::mem::take(&mut slot.records)
            }
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn has_records(&self) -> bool {
        let tree = self.document.tree.borrow();
        tree.observers
            .iter()
            .find(|s| s.id == self.id)
            .is_some_and(|s| !s.records.is_empty())
    }

    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        let tree = self.document.tree.borrow();
        tree.observers
            .iter()
            .find(|s| s.id == self.id)
            .map(|s| s.roots.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        if let Ok(mut tree) = self.document.tree.try_borrow_mut() {
            tree.observers.retain(|s| s.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_inside_observed_roots() {
        let doc = Document::new();
        let observed = doc.create_element("section");
        let other = doc.create_element("aside");
        doc.append_child(doc.body(), observed).unwrap();
        doc.append_child(doc.body(), other).unwrap();

        let observer = doc.mutation_observer();
        observer.observe(observed).unwrap();
        doc.set_attribute(other, "x", "1").unwrap();
        doc.set_attribute(observed, "x", "1").unwrap();

        let records = observer.take_records();
        assert_eq!(
            records,
            vec![MutationRecord::Attributes {
                target: observed,
                name: "x".into(),
                old_value: None
            }]
        );
        assert!(!observer.has_records());
    }

    #[test]
    fn moving_a_node_reports_removal_then_addition() {
        let doc = Document::new();
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        doc.append_child(doc.body(), a).unwrap();
        doc.append_child(doc.body(), b).unwrap();
        let observer = doc.mutation_observer();
        observer.observe(doc.body()).unwrap();

        doc.append_child(a, b).unwrap();
        let records = observer.take_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[0],
            MutationRecord::ChildList { target, removed, .. } if *target == doc.body() && removed == &vec![b]
        ));
        assert!(matches!(
            &records[1],
            MutationRecord::ChildList { target, added, .. } if *target == a && added == &vec![b]
        ));
    }

    #[test]
    fn detached_subtree_is_reported_until_records_are_taken() {
        let doc = Document::new();
        let a = doc.create_element("a");
        doc.append_child(doc.body(), a).unwrap();
        let observer = doc.mutation_observer();
        observer.observe(doc.body()).unwrap();

        doc.remove(a).unwrap();
        doc.set_attribute(a, "late", "1").unwrap();
        assert_eq!(observer.take_records().len(), 2);

        doc.set_attribute(a, "later", "1").unwrap();
        assert!(observer.take_records().is_empty());
    }

    #[test]
    fn disconnect_discards_queue() {
        let doc = Document::new();
        let observer = doc.mutation_observer();
        observer.observe(doc.body()).unwrap();
        doc.set_attribute(doc.body(), "x", "1").unwrap();
        observer.disconnect();
        assert!(observer.take_records().is_empty());
        assert!(observer.roots().is_empty());
    }

    #[test]
    fn dropping_observer_unregisters_it() {
        let doc = Document::new();
        {
            let observer = doc.mutation_observer();
            observer.observe(doc.body()).unwrap();
        }
        assert_eq!(doc.tree.borrow().observers.len(), 0);
    }
}
