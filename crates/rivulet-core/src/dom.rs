#![forbid(unsafe_code)]

//! Shared node arena.
//!
//! [`Document`] is a cheaply cloneable handle (`Rc<RefCell<..>>` inside) over
//! a generational slab of element and text nodes. Removing a node only
//! detaches it; a detached subtree is freed by [`Document::reclaim`], which
//! recycles its slots. A [`NodeId`] carries the generation of its slot, so
//! ids of reclaimed nodes go stale instead of aliasing the slot's next
//! occupant.
//!
//! # Invariants
//!
//! 1. `children` of a node is ordered and contains no duplicates.
//! 2. `node.parent == Some(p)` iff `p.children` contains `node`.
//! 3. The body never has a parent and is never removed or reclaimed.
//! 4. Every structural or attribute change on a node inside an observed
//!    subtree queues exactly one [`MutationRecord`] per interested observer.
//!
//! # Failure Modes
//!
//! - Foreign or stale [`NodeId`]: read accessors return empty values,
//!   mutating accessors return [`DomError::UnknownNode`].
//! - Inserting a node into itself or its own subtree:
//!   [`DomError::Hierarchy`], and the tree is left untouched.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};

use crate::error::{DomError, Result};
use crate::event::ListenerEntry;
use crate::mutation::{MutationRecord, ObserverSlot};

/// Handle to a node inside one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot generation in the high half, slot index in the low half.
    #[must_use]
    pub const fn raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    fn index(self) -> usize {
        self.index as usize
    }
}

/// An attribute as seen by readers. `value` is `None` for an attribute that
/// has just been removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn removed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
}

pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) tag: String,
    pub(crate) text: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    ext: AHashMap<TypeId, Rc<dyn Any>>,
}

impl Node {
    fn new(kind: NodeKind, tag: String, text: String) -> Self {
        Self {
            kind,
            tag,
            text,
            attributes: Vec::new(),
            parent: None,
            children: Vec::new(),
            ext: AHashMap::new(),
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Everything [`Tree::free_subtree`] took out of the tree. Dropped by the
/// caller once the tree borrow is released, since extension values and
/// listener callbacks may own arbitrary user state.
pub(crate) struct Released {
    pub(crate) nodes: Vec<NodeId>,
    _ext: Vec<AHashMap<TypeId, Rc<dyn Any>>>,
    _listeners: Vec<ListenerEntry>,
}

pub(crate) struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    pub(crate) body: NodeId,
    pub(crate) observers: Vec<ObserverSlot>,
    pub(crate) listeners: Vec<ListenerEntry>,
    pub(crate) next_listener: u64,
    pub(crate) next_observer: u64,
}

impl Tree {
    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)?
            .node
            .as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)?
            .node
            .as_mut()
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Free `root` and its descendants. The caller has checked that `root`
    /// is detached.
    pub(crate) fn free_subtree(&mut self, root: NodeId) -> Released {
        let mut nodes = Vec::new();
        let mut ext = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(id.index())
                .filter(|s| s.generation == id.generation)
            else {
                continue;
            };
            let Some(node) = slot.node.take() else {
                continue;
            };
            // A slot whose generation would wrap is retired instead of reused.
            if let Some(next) = slot.generation.checked_add(1) {
                slot.generation = next;
                self.free.push(id.index);
            }
            self.live -= 1;
            stack.extend(node.children.iter().copied());
            if !node.ext.is_empty() {
                ext.push(node.ext);
            }
            nodes.push(id);
        }
        let freed: AHashSet<NodeId> = nodes.iter().copied().collect();
        let listeners = self.purge_listeners(&freed);
        self.forget_observed(&freed);
        Released {
            nodes,
            _ext: ext,
            _listeners: listeners,
        }
    }

    pub(crate) fn alloc_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::new(
            NodeKind::Element,
            tag.to_ascii_lowercase(),
            String::new(),
        ))
    }

    pub(crate) fn alloc_text(&mut self, text: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Text, String::new(), text.to_owned()))
    }

    pub(crate) fn element(&self, id: NodeId) -> Result<&Node> {
        let node = self.node(id).ok_or(DomError::UnknownNode(id))?;
        if node.kind != NodeKind::Element {
            return Err(DomError::NotAnElement(id));
        }
        Ok(node)
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Inclusive ancestry test.
    pub(crate) fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn is_connected(&self, node: NodeId) -> bool {
        self.node(node).is_some() && self.contains(self.body, node)
    }

    /// Unlink `node` from its parent, queueing a removal record.
    pub(crate) fn detach(&mut self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        self.record(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
        });
        self.register_transient(parent, node);
        self.unlink(parent, node);
        Some(parent)
    }

    /// Unlink without queueing records; callers batch their own record.
    pub(crate) fn unlink(&mut self, parent: NodeId, node: NodeId) {
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != node);
        }
        if let Some(n) = self.node_mut(node) {
            n.parent = None;
        }
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match node.kind {
            NodeKind::Text => out.push_str(&node.text),
            NodeKind::Element => {
                for child in &node.children {
                    self.text_content(*child, out);
                }
            }
        }
    }

    /// Replace every child of `parent` with `added`, as one record.
    pub(crate) fn replace_children(&mut self, parent: NodeId, added: Vec<NodeId>) {
        let removed = self
            .node(parent)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        if removed.is_empty() && added.is_empty() {
            return;
        }
        self.record(MutationRecord::ChildList {
            target: parent,
            added: added.clone(),
            removed: removed.clone(),
        });
        for child in &removed {
            self.register_transient(parent, *child);
            self.unlink(parent, *child);
        }
        for child in &added {
            if let Some(n) = self.node_mut(*child) {
                n.parent = Some(parent);
            }
        }
        if let Some(p) = self.node_mut(parent) {
            p.children = added;
        }
    }
}

/// Shared handle to a document.
///
/// Cloning a `Document` creates a new handle to the **same** tree.
#[derive(Clone)]
pub struct Document {
    pub(crate) tree: Rc<RefCell<Tree>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.tree.borrow();
        f.debug_struct("Document")
            .field("nodes", &tree.live)
            .field("observers", &tree.observers.len())
            .field("listeners", &tree.listeners.len())
            .finish()
    }
}

/// Non-owning [`Document`] handle.
#[derive(Clone, Debug)]
pub struct WeakDocument {
    tree: Weak<RefCell<Tree>>,
}

impl WeakDocument {
    #[must_use]
    pub fn upgrade(&self) -> Option<Document> {
        self.tree.upgrade().map(|tree| Document { tree })
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only its `<body>`.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Tree {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            body: NodeId {
                index: 0,
                generation: 0,
            },
            observers: Vec::new(),
            listeners: Vec::new(),
            next_listener: 1,
            next_observer: 1,
        };
        tree.body = tree.alloc_element("body");
        Self {
            tree: Rc::new(RefCell::new(tree)),
        }
    }

    /// A handle that does not keep the document alive. Callbacks stored
    /// inside the document (in extension slots) hold this instead of a
    /// [`Document`] so the tree can be released.
    #[must_use]
    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument {
            tree: Rc::downgrade(&self.tree),
        }
    }

    /// Whether two handles point at the same document.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree)
    }

    #[must_use]
    pub fn body(&self) -> NodeId {
        self.tree.borrow().body
    }

    /// Create a detached element. Tag names are lower-cased.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().alloc_element(tag)
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree.borrow_mut().alloc_text(text)
    }

    #[must_use]
    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.tree.borrow().node(node).map(|n| n.kind)
    }

    #[must_use]
    pub fn is_element(&self, node: NodeId) -> bool {
        self.kind(node) == Some(NodeKind::Element)
    }

    #[must_use]
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        let tree = self.tree.borrow();
        tree.element(node).ok().map(|n| n.tag.clone())
    }

    #[must_use]
    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().parent(node)
    }

    /// Element children in document order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        let Some(n) = tree.node(node) else {
            return Vec::new();
        };
        n.children
            .iter()
            .copied()
            .filter(|c| tree.node(*c).is_some_and(|c| c.kind == NodeKind::Element))
            .collect()
    }

    /// All children, text nodes included.
    #[must_use]
    pub fn child_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Element descendants of `node` in depth-first document order,
    /// excluding `node` itself.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).into_iter().rev());
        }
        out
    }

    /// Inclusive ancestry test: `contains(a, a)` is true.
    #[must_use]
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.tree.borrow().contains(ancestor, node)
    }

    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.tree.borrow().is_connected(node)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end).
    ///
    /// A child that already has a parent is moved: the removal and the
    /// insertion are queued as two separate records.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        tree.element(parent)?;
        if tree.node(child).is_none() {
            return Err(DomError::UnknownNode(child));
        }
        if child == tree.body || tree.contains(child, parent) {
            return Err(DomError::Hierarchy { parent, child });
        }
        let mut reference = reference;
        if let Some(r) = reference {
            if tree.parent(r) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    reference: r,
                });
            }
            if r == child {
                reference = tree.node(parent).and_then(|p| {
                    let at = p.children.iter().position(|c| *c == child)?;
                    p.children.get(at + 1).copied()
                });
            }
        }

        tree.detach(child);

        let index = match reference {
            Some(r) => tree
                .node(parent)
                .and_then(|p| p.children.iter().position(|c| *c == r))
                .unwrap_or_else(|| tree.node(parent).map_or(0, |p| p.children.len())),
            None => tree.node(parent).map_or(0, |p| p.children.len()),
        };
        if let Some(p) = tree.node_mut(parent) {
            p.children.insert(index, child);
        }
        if let Some(c) = tree.node_mut(child) {
            c.parent = Some(parent);
        }
        tree.record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Detach `node` from its parent. Detached nodes are left alone.
    pub fn remove(&self, node: NodeId) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        if tree.node(node).is_none() {
            return Err(DomError::UnknownNode(node));
        }
        tree.detach(node);
        Ok(())
    }

    /// Free a detached subtree: its nodes, their extension slots, and
    /// listeners targeting them. Observers stop watching freed nodes.
    /// Returns how many nodes were freed; their ids become stale.
    ///
    /// Extension values are dropped after the document is unlocked, so
    /// their destructors may use the document.
    pub fn reclaim(&self, node: NodeId) -> Result<usize> {
        let released = {
            let mut tree = self.tree.borrow_mut();
            if tree.node(node).is_none() {
                return Err(DomError::UnknownNode(node));
            }
            if node == tree.body || tree.parent(node).is_some() {
                return Err(DomError::Attached(node));
            }
            tree.free_subtree(node)
        };
        Ok(released.nodes.len())
    }

    /// Number of live nodes, the body included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.borrow().live
    }

    /// Attributes in declaration order.
    #[must_use]
    pub fn attributes(&self, node: NodeId) -> Vec<Attribute> {
        self.tree
            .borrow()
            .element(node)
            .map(|n| {
                n.attributes
                    .iter()
                    .map(|(k, v)| Attribute::new(k.as_str(), v.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let tree = self.tree.borrow();
        let n = tree.element(node).ok()?;
        n.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    #[must_use]
    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        tree.element(node)?;
        let old_value = {
            let Some(n) = tree.node_mut(node) else {
                return Err(DomError::UnknownNode(node));
            };
            match n.attributes.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => Some(std::mem::replace(v, value.to_owned())),
                None => {
                    n.attributes.push((name.to_owned(), value.to_owned()));
                    None
                }
            }
        };
        tree.record(MutationRecord::Attributes {
            target: node,
            name: name.to_owned(),
            old_value,
        });
        Ok(())
    }

    /// Remove an attribute. Returns whether it was present; removing an
    /// absent attribute queues nothing.
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<bool> {
        let mut tree = self.tree.borrow_mut();
        tree.element(node)?;
        let old_value = tree.node_mut(node).and_then(|n| {
            let at = n.attributes.iter().position(|(k, _)| k == name)?;
            Some(n.attributes.remove(at).1)
        });
        let Some(old_value) = old_value else {
            return Ok(false);
        };
        tree.record(MutationRecord::Attributes {
            target: node,
            name: name.to_owned(),
            old_value: Some(old_value),
        });
        Ok(true)
    }

    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().text_content(node, &mut out);
        out
    }

    /// Replace the children of an element with a single text node
    /// (or nothing, for an empty string). Text nodes get their data replaced.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        let kind = tree
            .node(node)
            .map(|n| n.kind)
            .ok_or(DomError::UnknownNode(node))?;
        if kind == NodeKind::Text {
            if let Some(n) = tree.node_mut(node) {
                n.text = text.to_owned();
            }
            return Ok(());
        }
        let added = if text.is_empty() {
            Vec::new()
        } else {
            vec![tree.alloc_text(text)]
        };
        tree.replace_children(node, added);
        Ok(())
    }

    /// Typed per-node storage, released together with the document.
    #[must_use]
    pub fn ext<T: Any>(&self, node: NodeId) -> Option<Rc<T>> {
        let tree = self.tree.borrow();
        let slot = tree.node(node)?.ext.get(&TypeId::of::<T>())?.clone();
        slot.downcast::<T>().ok()
    }

    /// Get the slot of type `T`, creating it with `init` when absent.
    pub fn ext_or_insert_with<T: Any>(&self, node: NodeId, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(existing) = self.ext::<T>(node) {
            return existing;
        }
        let value = Rc::new(init());
        self.set_ext(node, Rc::clone(&value));
        value
    }

    pub fn set_ext<T: Any>(&self, node: NodeId, value: Rc<T>) {
        if let Some(n) = self.tree.borrow_mut().node_mut(node) {
            n.ext.insert(TypeId::of::<T>(), value);
        }
    }

    pub fn take_ext<T: Any>(&self, node: NodeId) -> Option<Rc<T>> {
        let slot = self
            .tree
            .borrow_mut()
            .node_mut(node)?
            .ext
            .remove(&TypeId::of::<T>())?;
        slot.downcast::<T>().ok()
    }
}
