#![forbid(unsafe_code)]

//! Mutation reconciliation.
//!
//! The runtime is either idle or running a tick. A tick is one traversal
//! pass (or one batch of queued work items) inside a reactive batch, followed
//! by a scheduler drain. `observe`, `disconnect`, `force`, `notify`,
//! `register` and `configure` are only accepted while idle.
//!
//! Raw mutation records are folded into a queue of `(element, opcode)` work
//! items before anything is traversed:
//!
//! - a prefixed attribute change queues `Mutate`; if the attribute is gone a
//!   removed placeholder is kept for the next visit of that element,
//! - an added, connected element queues `Mount` and is stamped with the
//!   batch nonce,
//! - a removed element queues `Unmount` unless it carries this batch's
//!   stamp (it was re-added) or is still connected (it moved).
//!
//! A removed node that is still parentless once its tick has run is
//! reclaimed from the document together with its subtree (see
//! [`Config::reclaim`](crate::Config::reclaim)). Its id goes stale; a host
//! that wants to reinsert a node later parks it under a detached element.
//!
//! # Invariants
//!
//! 1. Observed roots never nest.
//! 2. An element is traversed at most once per batch; its first work item
//!    wins.
//! 3. After every tick, successful or not, the runtime is idle, no droplet
//!    is active, and the queue, the removed placeholders and the scheduler
//!    are empty.
//!
//! # Failure Modes
//!
//! An error raised by a worker, factory, hook or task aborts the rest of the
//! tick and is returned to the caller of the entry point. The tick guard
//! restores the invariants above, so the next batch starts clean.

use std::cell::Cell;

use ahash::{AHashMap, AHashSet};
use rivulet_core::{Attribute, MutationRecord, NodeId};
use tracing::{debug_span, trace, warn};

use crate::attribute;
use crate::error::{Error, Result};
use crate::lifecycle;
use crate::reactive::batch;
use crate::registry::ControllerRecord;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::{Opcode, traverse};

#[derive(Debug, Default)]
pub(crate) struct ObserverState {
    pub(crate) roots: Vec<NodeId>,
    queue: Vec<(NodeId, Opcode)>,
    queued: AHashSet<NodeId>,
    pub(crate) removed: AHashMap<NodeId, Vec<Attribute>>,
    released: Vec<NodeId>,
    nonce: u64,
}

impl ObserverState {
    fn enqueue(&mut self, element: NodeId, opcode: Opcode) {
        if self.queued.insert(element) {
            trace!(element = element.raw(), ?opcode, "work item queued");
            self.queue.push((element, opcode));
        }
    }

    fn record_removed(&mut self, element: NodeId, name: &str) {
        let list = self.removed.entry(element).or_default();
        if !list.iter().any(|a| a.name == name) {
            list.push(Attribute::removed(name));
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.removed.clear();
        self.released.clear();
    }
}

/// Batch nonce stamped on added nodes.
struct Stamp(Cell<u64>);

/// Restores the idle state when a tick ends, including on unwind.
struct TickGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> TickGuard<'a> {
    fn enter(runtime: &'a Runtime) -> Self {
        runtime.inner.idle.set(false);
        Self { runtime }
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        lifecycle::clear_active();
        self.runtime.inner.state.borrow_mut().reset();
        self.runtime.inner.scheduler.clear();
        self.runtime.inner.idle.set(true);
    }
}

impl Runtime {
    /// Start reconciling the subtree under `root` and mount it.
    pub fn observe(&self, root: NodeId) -> Result<()> {
        self.require_idle("observe")?;
        let document = self.document();
        if !document.is_element(root) {
            return Err(Error::usage("only elements can be observed"));
        }
        let roots = self.roots();
        if roots.contains(&root) {
            return Err(Error::usage("element is already observed"));
        }
        if roots.iter().any(|r| document.contains(*r, root)) {
            return Err(Error::usage("element is already part of an observed subtree"));
        }
        if roots.iter().any(|r| document.contains(root, *r)) {
            return Err(Error::usage("element contains an observed element"));
        }

        let span = debug_span!("rivulet.observe", root = root.raw());
        let _guard = span.enter();
        self.process_pending()?;
        self.inner.state.borrow_mut().roots.push(root);
        self.inner.observer.observe(root)?;
        self.tick(|| traverse(self, Opcode::Mount, root, None))
    }

    /// Unmount the subtree under `root` and stop reconciling it. `root` must
    /// be an observed root itself; parts of a root are opted out with the
    /// ignore instruction instead.
    pub fn disconnect(&self, root: NodeId) -> Result<()> {
        self.require_idle("disconnect")?;
        let document = self.document();
        if !document.is_element(root) {
            return Err(Error::usage("only elements can be disconnected"));
        }
        let roots = self.roots();
        if !roots.contains(&root) {
            if roots.iter().any(|r| document.contains(*r, root)) {
                return Err(Error::usage(
                    "element is part of an observed subtree; use the ignore instruction",
                ));
            }
            return Err(Error::usage("element is not observed"));
        }

        let span = debug_span!("rivulet.disconnect", root = root.raw());
        let _guard = span.enter();
        self.process_pending()?;
        let scope = document
            .parent_element(root)
            .and_then(|parent| Scope::closest(document, parent));
        self.tick(|| traverse(self, Opcode::Unmount, root, scope.as_ref()))?;

        self.inner.observer.unobserve(root);
        self.inner.state.borrow_mut().roots.retain(|r| *r != root);

        // Changes made by the unmount pass inside the released subtree are
        // not ours anymore.
        let remaining = self.roots();
        let records = self
            .inner
            .observer
            .take_records()
            .into_iter()
            .filter(|record| {
                remaining
                    .iter()
                    .any(|r| document.contains(*r, record.target()))
            })
            .collect();
        self.process(records)
    }

    /// Reconcile pending mutations now.
    pub fn force(&self) -> Result<()> {
        self.require_idle("force")?;
        self.process_pending()
    }

    /// Host entry point: mutation records are available.
    pub fn notify(&self) -> Result<()> {
        self.require_idle("notify")?;
        self.process_pending()
    }

    /// Whether the document has unreconciled mutations.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.observer.has_records()
    }

    pub(crate) fn process_pending(&self) -> Result<()> {
        let records = self.inner.observer.take_records();
        self.process(records)
    }

    fn process(&self, records: Vec<MutationRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let span = debug_span!("rivulet.process", records = records.len());
        let _guard = span.enter();
        self.parse_records(&records);
        let released = std::mem::take(&mut self.inner.state.borrow_mut().released);

        let result = self.tick(|| {
            let queue = std::mem::take(&mut self.inner.state.borrow_mut().queue);
            let document = self.document();
            for (element, opcode) in queue {
                // A detached element can only be torn down.
                let opcode = if document.is_connected(element) {
                    opcode
                } else {
                    Opcode::Unmount
                };
                let scope = document
                    .parent_element(element)
                    .and_then(|parent| Scope::closest(document, parent));
                if scope.as_ref().is_some_and(|s| s.within_ignored(document)) {
                    trace!(element = element.raw(), "inside ignored subtree");
                    continue;
                }
                traverse(self, opcode, element, scope.as_ref())?;
            }
            Ok(())
        });
        self.reclaim_detached(released);
        result
    }

    /// Free removed subtrees that nothing re-attached during the tick.
    fn reclaim_detached(&self, released: Vec<NodeId>) {
        let document = self.document();
        for node in released {
            // Freed with an earlier root, or parked under another node.
            if document.kind(node).is_none() || document.parent_element(node).is_some() {
                continue;
            }
            match document.reclaim(node) {
                Ok(nodes) => trace!(node = node.raw(), nodes, "detached subtree reclaimed"),
                Err(err) => warn!(node = node.raw(), error = %err, "reclaim failed"),
            }
        }
    }

    fn parse_records(&self, records: &[MutationRecord]) {
        let document = self.document();
        let prefix = self.prefix();
        let reclaim = self.inner.config.borrow().reclaim;
        let mut state = self.inner.state.borrow_mut();
        state.nonce += 1;
        let nonce = state.nonce;

        for record in records {
            match record {
                MutationRecord::Attributes { target, name, .. } => {
                    if !attribute::is_instruction(name, &prefix) {
                        continue;
                    }
                    state.enqueue(*target, Opcode::Mutate);
                    if !document.has_attribute(*target, name) {
                        state.record_removed(*target, name);
                    }
                }
                MutationRecord::ChildList { added, removed, .. } => {
                    for &node in added {
                        document
                            .ext_or_insert_with(node, || Stamp(Cell::new(0)))
                            .0
                            .set(nonce);
                        if document.is_element(node) && document.is_connected(node) {
                            state.enqueue(node, Opcode::Mount);
                        }
                    }
                    for &node in removed {
                        let readded = document
                            .ext::<Stamp>(node)
                            .is_some_and(|stamp| stamp.0.get() == nonce);
                        if readded || document.is_connected(node) {
                            continue;
                        }
                        if reclaim && !state.released.contains(&node) {
                            state.released.push(node);
                        }
                        if document.is_element(node) {
                            state.enqueue(node, Opcode::Unmount);
                        }
                    }
                }
            }
        }
    }

    /// Run `f` as one tick: a reactive batch, then the scheduler drain.
    fn tick(&self, f: impl FnOnce() -> Result<()>) -> Result<()> {
        let _tick = TickGuard::enter(self);
        let result = batch(f).and_then(|()| self.inner.scheduler.tick());
        if let Err(err) = &result {
            warn!(error = %err, "tick failed");
        }
        result
    }

    /// Registry listener: mount elements that were waiting for `record`.
    pub(crate) fn mount_registered(&self, record: &ControllerRecord) -> Result<()> {
        let document = self.document();
        let attribute = format!("{}controller", self.prefix());
        let mentions = |node: NodeId| {
            document
                .get_attribute(node, &attribute)
                .is_some_and(|value| value.split_whitespace().any(|t| t == record.name))
        };

        for root in self.roots() {
            if !mentions(root) && !document.descendants(root).into_iter().any(&mentions) {
                continue;
            }
            let span = debug_span!("rivulet.register", controller = %record.name, root = root.raw());
            let _guard = span.enter();
            self.process_pending()?;
            let scope = document
                .parent_element(root)
                .and_then(|parent| Scope::closest(document, parent));
            self.tick(|| traverse(self, Opcode::Mount, root, scope.as_ref()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Flow, FnWorker};
    use rivulet_core::Document;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(NodeId, Opcode)>>>;

    fn marker(runtime: &Runtime) -> Log {
        let log: Log = Rc::default();
        let (m, u) = (Rc::clone(&log), Rc::clone(&log));
        runtime
            .instruction(
                FnWorker::new("mark", 10)
                    .on_mount(move |_, opcode, _, scope| {
                        m.borrow_mut().push((scope.root(), opcode));
                        Ok(Flow::Continue)
                    })
                    .on_unmount(move |_, _, scope| {
                        u.borrow_mut().push((scope.root(), Opcode::Unmount));
                        Ok(Flow::Continue)
                    }),
            )
            .unwrap();
        log
    }

    fn setup() -> (Document, Runtime, NodeId, Log) {
        let doc = Document::new();
        let runtime = Runtime::new(doc.clone());
        let log = marker(&runtime);
        let root = doc.create_element("main");
        doc.append_child(doc.body(), root).unwrap();
        (doc, runtime, root, log)
    }

    #[test]
    fn roots_cannot_nest() {
        let (doc, runtime, root, _) = setup();
        let inner = doc.create_element("div");
        doc.append_child(root, inner).unwrap();

        runtime.observe(inner).unwrap();
        assert!(matches!(runtime.observe(root), Err(Error::Usage(_))));
        assert!(matches!(runtime.observe(inner), Err(Error::Usage(_))));
        runtime.disconnect(inner).unwrap();

        runtime.observe(root).unwrap();
        assert!(matches!(runtime.observe(inner), Err(Error::Usage(_))));
        assert!(matches!(runtime.disconnect(inner), Err(Error::Usage(_))));

        let sibling = doc.create_element("aside");
        doc.append_child(doc.body(), sibling).unwrap();
        runtime.observe(sibling).unwrap();
        assert_eq!(runtime.roots(), vec![root, sibling]);
    }

    #[test]
    fn text_nodes_are_rejected() {
        let (doc, runtime, root, _) = setup();
        let text = doc.create_text("hi");
        doc.append_child(root, text).unwrap();
        assert!(matches!(runtime.observe(text), Err(Error::Usage(_))));
        assert!(matches!(runtime.disconnect(root), Err(Error::Usage(_))));
    }

    #[test]
    fn attribute_removal_replays_as_unmount() {
        let (doc, runtime, root, log) = setup();
        let el = doc.create_element("p");
        doc.set_attribute(el, "x-mark", "").unwrap();
        doc.append_child(root, el).unwrap();
        runtime.observe(root).unwrap();
        assert_eq!(*log.borrow(), vec![(el, Opcode::Mount)]);

        doc.set_attribute(el, "x-mark", "again").unwrap();
        doc.set_attribute(el, "title", "ignored").unwrap();
        runtime.force().unwrap();
        doc.remove_attribute(el, "x-mark").unwrap();
        runtime.force().unwrap();
        assert_eq!(
            log.borrow()[1..],
            [(el, Opcode::Mutate), (el, Opcode::Unmount)]
        );
        assert!(runtime.inner.state.borrow().removed.is_empty());
    }

    #[test]
    fn first_work_item_wins() {
        let (doc, runtime, root, log) = setup();
        runtime.observe(root).unwrap();
        let el = doc.create_element("p");
        doc.append_child(root, el).unwrap();
        doc.set_attribute(el, "x-mark", "").unwrap();
        runtime.force().unwrap();
        assert_eq!(*log.borrow(), vec![(el, Opcode::Mount)]);
    }

    #[test]
    fn move_within_batch_is_silent() {
        let (doc, runtime, root, log) = setup();
        let holder = doc.create_element("div");
        let target = doc.create_element("span");
        doc.set_attribute(target, "x-mark", "").unwrap();
        doc.append_child(root, holder).unwrap();
        doc.append_child(holder, target).unwrap();
        runtime.observe(root).unwrap();
        log.borrow_mut().clear();

        doc.remove(target).unwrap();
        doc.append_child(holder, target).unwrap();
        runtime.force().unwrap();
        // re-added in the same batch: mounted again at most, never unmounted
        assert!(log.borrow().iter().all(|(_, op)| *op != Opcode::Unmount));

        log.borrow_mut().clear();
        doc.remove(target).unwrap();
        runtime.force().unwrap();
        assert_eq!(*log.borrow(), vec![(target, Opcode::Unmount)]);
    }

    #[test]
    fn state_errors_while_running() {
        let (doc, runtime, root, _) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        runtime
            .instruction(FnWorker::new("reenter", 1).on_mount(move |rt, _, _, _| {
                s.borrow_mut().push(rt.is_idle());
                s.borrow_mut().push(matches!(rt.force(), Err(Error::State(_))));
                s.borrow_mut().push(matches!(
                    rt.register("late", |_| Ok(())),
                    Err(Error::State(_))
                ));
                s.borrow_mut().push(matches!(
                    rt.instruction(FnWorker::new("late", 1)),
                    Err(Error::State(_))
                ));
                Ok(Flow::Continue)
            }))
            .unwrap();
        doc.set_attribute(root, "x-reenter", "").unwrap();
        runtime.observe(root).unwrap();
        assert_eq!(*seen.borrow(), vec![false, true, true, true]);
        assert!(runtime.instructions().get("late").is_none());
        assert!(runtime.is_idle());
    }

    #[test]
    fn failure_restores_idle_and_clears_queues() {
        let (doc, runtime, root, log) = setup();
        runtime
            .instruction(
                FnWorker::new("boom", 1)
                    .on_mount(|_, _, _, _| Err(Error::callback("worker failed"))),
            )
            .unwrap();
        let bad = doc.create_element("p");
        doc.set_attribute(bad, "x-boom", "").unwrap();
        doc.append_child(root, bad).unwrap();
        runtime.immediate(|| Ok(()));

        assert!(matches!(runtime.observe(root), Err(Error::Callback(_))));
        assert!(runtime.is_idle());
        assert!(runtime.scheduler().is_empty());
        assert!(lifecycle::active().is_none());

        doc.remove_attribute(bad, "x-boom").unwrap();
        let good = doc.create_element("p");
        doc.set_attribute(good, "x-mark", "").unwrap();
        doc.append_child(root, good).unwrap();
        runtime.force().unwrap();
        assert!(log.borrow().contains(&(good, Opcode::Mount)));
    }

    #[test]
    fn ignored_subtrees_are_not_reconciled() {
        let (doc, runtime, root, log) = setup();
        let zone = doc.create_element("div");
        doc.set_attribute(zone, "x-ignore", "").unwrap();
        doc.append_child(root, zone).unwrap();
        runtime.observe(root).unwrap();

        let inside = doc.create_element("p");
        doc.set_attribute(inside, "x-mark", "").unwrap();
        doc.append_child(zone, inside).unwrap();
        runtime.force().unwrap();
        assert!(log.borrow().is_empty());

        doc.remove_attribute(zone, "x-ignore").unwrap();
        runtime.force().unwrap();
        assert_eq!(*log.borrow(), vec![(inside, Opcode::Mutate)]);
    }

    #[test]
    fn disconnect_unmounts_and_stops_watching() {
        let (doc, runtime, root, log) = setup();
        doc.set_attribute(root, "x-mark", "").unwrap();
        runtime.observe(root).unwrap();
        runtime.disconnect(root).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![(root, Opcode::Mount), (root, Opcode::Unmount)]
        );
        assert!(runtime.roots().is_empty());

        let late = doc.create_element("p");
        doc.set_attribute(late, "x-mark", "").unwrap();
        doc.append_child(root, late).unwrap();
        runtime.force().unwrap();
        assert_eq!(log.borrow().len(), 2);
        assert!(!runtime.has_pending());
    }
}
