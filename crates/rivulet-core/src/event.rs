#![forbid(unsafe_code)]

//! Named event dispatch with capture and bubble phases.
//!
//! Listeners are registered on a node, on the document, or on the window
//! that holds the document. Dispatch walks the path window -> target for
//! capturing listeners, then target -> window for the rest. Detached nodes
//! only reach their own ancestors. The listener list of each hop is
//! snapshotted before invocation, so listeners may add or remove listeners
//! (or mutate the tree) without disturbing the current dispatch.

use std::cell::Cell;
use std::rc::Rc;

use ahash::AHashSet;
use bitflags::bitflags;

use crate::dom::{Document, NodeId, Tree};

bitflags! {
    /// Listener registration options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ListenerFlags: u8 {
        /// Fire during the capture phase.
        const CAPTURE = 1 << 0;
        /// Remove after the first invocation.
        const ONCE    = 1 << 1;
        /// `prevent_default` is ignored inside this listener.
        const PASSIVE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Node(NodeId),
    Document,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type Listener = Rc<dyn Fn(&Event)>;

pub(crate) struct ListenerEntry {
    id: ListenerId,
    target: EventTarget,
    kind: String,
    flags: ListenerFlags,
    callback: Listener,
}

/// A dispatched event, shared by every listener along the path.
///
/// A clone taken during dispatch is a snapshot for deferred handling;
/// calling `prevent_default` on it no longer affects the dispatch.
#[derive(Debug, Clone)]
pub struct Event {
    kind: String,
    target: NodeId,
    current_target: Cell<EventTarget>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
    passive: Cell<bool>,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The node the event was dispatched on.
    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The hop whose listener is currently running.
    #[must_use]
    pub fn current_target(&self) -> EventTarget {
        self.current_target.get()
    }

    pub fn prevent_default(&self) {
        if !self.passive.get() {
            self.default_prevented.set(true);
        }
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    /// Stop after the listeners of the current hop finish.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[must_use]
    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}

impl Tree {
    /// Unregister listeners on `freed` nodes, handing them back for the
    /// caller to drop outside the borrow.
    pub(crate) fn purge_listeners(&mut self, freed: &AHashSet<NodeId>) -> Vec<ListenerEntry> {
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|l| matches!(l.target, EventTarget::Node(n) if freed.contains(&n)));
        self.listeners = kept;
        gone
    }
}

impl Document {
    pub fn add_event_listener(
        &self,
        target: EventTarget,
        kind: &str,
        flags: ListenerFlags,
        listener: impl Fn(&Event) + 'static,
    ) -> ListenerId {
        let mut tree = self.tree.borrow_mut();
        let id = ListenerId(tree.next_listener);
        tree.next_listener += 1;
        tree.listeners.push(ListenerEntry {
            id,
            target,
            kind: kind.to_owned(),
            flags,
            callback: Rc::new(listener),
        });
        id
    }

    /// Returns whether the listener was still registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut tree = self.tree.borrow_mut();
        let before = tree.listeners.len();
        tree.listeners.retain(|l| l.id != id);
        tree.listeners.len() != before
    }

    #[must_use]
    pub fn listener_count(&self, target: EventTarget, kind: &str) -> usize {
        self.tree
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.target == target && l.kind == kind)
            .count()
    }

    /// Dispatch `kind` on `node` and return the finished event.
    pub fn dispatch_event(&self, node: NodeId, kind: &str) -> Event {
        let event = Event {
            kind: kind.to_owned(),
            target: node,
            current_target: Cell::new(EventTarget::Node(node)),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
            passive: Cell::new(false),
        };

        let path = self.event_path(node);
        for hop in path.iter().rev() {
            if event.propagation_stopped() {
                return event;
            }
            self.invoke(&event, *hop, true);
        }
        for hop in &path {
            if event.propagation_stopped() {
                return event;
            }
            self.invoke(&event, *hop, false);
        }
        event
    }

    /// Target first, window last.
    fn event_path(&self, node: NodeId) -> Vec<EventTarget> {
        let tree = self.tree.borrow();
        let mut path = Vec::new();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            path.push(EventTarget::Node(current));
            cursor = tree.parent(current);
        }
        if tree.is_connected(node) {
            path.push(EventTarget::Document);
            path.push(EventTarget::Window);
        }
        path
    }

    fn invoke(&self, event: &Event, hop: EventTarget, capture: bool) {
        let snapshot: Vec<(ListenerId, ListenerFlags, Listener)> = {
            let tree = self.tree.borrow();
            tree.listeners
                .iter()
                .filter(|l| {
                    l.target == hop
                        && l.kind == event.kind
                        && l.flags.contains(ListenerFlags::CAPTURE) == capture
                })
                .map(|l| (l.id, l.flags, Rc::clone(&l.callback)))
                .collect()
        };
        event.current_target.set(hop);
        for (id, flags, callback) in snapshot {
            {
                let mut tree = self.tree.borrow_mut();
                if !tree.listeners.iter().any(|l| l.id == id) {
                    continue;
                }
                if flags.contains(ListenerFlags::ONCE) {
                    tree.listeners.retain(|l| l.id != id);
                }
            }
            event.passive.set(flags.contains(ListenerFlags::PASSIVE));
            callback(event);
            event.passive.set(false);
        }
    }
}
