#![forbid(unsafe_code)]

//! Reactive substrate used by controllers and instruction workers.
//!
//! - [`Observable`]: a shared, version-tracked value with change
//!   notification via subscriber callbacks.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`watch`]: run a callback now and on every change (an effect).
//! - [`BatchScope`] / [`batch`]: defer notifications until the outermost
//!   scope exits.
//!
//! # Architecture
//!
//! `Observable<T>` uses `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification. `BatchScope` keeps its depth and pending
//! notifications in a thread-local.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. Within a `BatchScope`, values are updated immediately but notifications
//!    are deferred until the outermost scope exits.

pub mod batch;
pub mod observable;

pub use batch::{BatchScope, batch, untracked};
pub use observable::{Observable, Subscription, watch};
