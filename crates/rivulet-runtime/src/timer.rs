#![forbid(unsafe_code)]

//! Host-driven timers.
//!
//! Deferred listener work (`debounce`, `throttle`) needs a clock and a way to
//! run callbacks later. The runtime owns no event loop, so timers only fire
//! when the host calls [`Runtime::run_timers`]; [`Runtime::next_deadline`]
//! tells it how long it may sleep.
//!
//! Time comes from `web_time::Instant::now()`, or from a [`LabClock`] that
//! tests advance by hand.
//!
//! # Invariants
//!
//! 1. Due timers fire in deadline order, ties in creation order.
//! 2. A timer created while timers are firing waits for the next
//!    `run_timers` call, even when it is already due.
//! 3. A cleared timer never fires.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;
use web_time::{Duration, Instant};

use crate::runtime::Runtime;

/// A manually advanced clock for deterministic tests.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset: Rc<Cell<Duration>>,
}

impl LabClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: Rc::default(),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.offset.set(self.offset.get() + delta);
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + self.offset.get()
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
enum TimeSource {
    Real,
    Lab(LabClock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct Pending {
    id: TimerId,
    due: Instant,
    task: Box<dyn FnOnce()>,
}

pub(crate) struct Timers {
    source: RefCell<TimeSource>,
    pending: RefCell<Vec<Pending>>,
    next: Cell<u64>,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            source: RefCell::new(TimeSource::Real),
            pending: RefCell::default(),
            next: Cell::new(1),
        }
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("source", &*self.source.borrow())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl Timers {
    pub(crate) fn now(&self) -> Instant {
        match &*self.source.borrow() {
            TimeSource::Real => Instant::now(),
            TimeSource::Lab(clock) => clock.now(),
        }
    }

    pub(crate) fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let id = TimerId(self.next.get());
        self.next.set(id.0 + 1);
        let due = self.now() + delay;
        trace!(timer = id.0, delay_ms = delay.as_millis() as u64, "timer set");
        self.pending.borrow_mut().push(Pending {
            id,
            due,
            task: Box::new(task),
        });
        id
    }

    pub(crate) fn clear(&self, id: TimerId) -> bool {
        let mut pending = self.pending.borrow_mut();
        let before = pending.len();
        pending.retain(|p| p.id != id);
        pending.len() != before
    }

    fn run_due(&self) -> usize {
        let now = self.now();
        let mut due: Vec<Pending> = {
            let mut pending = self.pending.borrow_mut();
            let (due, rest): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|p| p.due <= now);
            *pending = rest;
            due
        };
        due.sort_by_key(|p| (p.due, p.id));
        let fired = due.len();
        for Pending { id, task, .. } in due {
            trace!(timer = id.0, "timer fired");
            task();
        }
        fired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.borrow().iter().map(|p| p.due).min()
    }
}

impl Runtime {
    /// Read time from `clock` instead of the system clock.
    pub fn use_lab_clock(&self, clock: &LabClock) {
        *self.inner.timers.source.borrow_mut() = TimeSource::Lab(clock.clone());
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.timers.now()
    }

    /// Run `task` once `delay` has passed, on a later [`Runtime::run_timers`].
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        self.inner.timers.set_timeout(delay, task)
    }

    /// Returns whether the timer was still pending.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner.timers.clear(id)
    }

    /// Host entry point: fire every timer that is due. Returns how many ran.
    pub fn run_timers(&self) -> usize {
        self.inner.timers.run_due()
    }

    /// When the earliest pending timer is due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.timers.next_deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::Document;

    fn lab() -> (Runtime, LabClock) {
        let runtime = Runtime::new(Document::new());
        let clock = LabClock::new();
        runtime.use_lab_clock(&clock);
        (runtime, clock)
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let (runtime, clock) = lab();
        let log: Rc<RefCell<Vec<u32>>> = Rc::default();
        for (delay, tag) in [(30, 3), (10, 1), (20, 2), (10, 4)] {
            let l = Rc::clone(&log);
            runtime.set_timeout(Duration::from_millis(delay), move || l.borrow_mut().push(tag));
        }
        assert_eq!(runtime.run_timers(), 0);

        clock.advance(Duration::from_millis(20));
        assert_eq!(runtime.run_timers(), 3);
        assert_eq!(*log.borrow(), [1, 4, 2]);
        assert_eq!(
            runtime.next_deadline(),
            Some(clock.now() + Duration::from_millis(10))
        );
    }

    #[test]
    fn cleared_timers_never_fire() {
        let (runtime, clock) = lab();
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        let id = runtime.set_timeout(Duration::ZERO, move || h.set(true));
        assert!(runtime.clear_timeout(id));
        assert!(!runtime.clear_timeout(id));
        clock.advance(Duration::from_secs(1));
        assert_eq!(runtime.run_timers(), 0);
        assert!(!hit.get());
    }

    #[test]
    fn timers_set_while_firing_wait_for_the_next_run() {
        let (runtime, _clock) = lab();
        let hits = Rc::new(Cell::new(0));
        let (h, rt) = (Rc::clone(&hits), runtime.clone());
        runtime.set_timeout(Duration::ZERO, move || {
            h.set(h.get() + 1);
            let h = Rc::clone(&h);
            rt.set_timeout(Duration::ZERO, move || h.set(h.get() + 1));
        });
        assert_eq!(runtime.run_timers(), 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(runtime.run_timers(), 1);
        assert_eq!(hits.get(), 2);
    }
}
