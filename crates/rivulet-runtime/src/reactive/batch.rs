#![forbid(unsafe_code)]

//! Batched notification.
//!
//! While a [`BatchScope`] is alive, writes to any [`Observable`] apply
//! immediately but their notifications are queued, coalesced per observable,
//! and delivered when the outermost scope drops.
//!
//! # Invariants
//!
//! 1. Scopes nest; only the outermost drop flushes.
//! 2. An observable written several times inside one batch notifies once,
//!    with its final value, in order of first write.
//! 3. Notifications raised while flushing run after the current flush
//!    list, before the outermost drop returns.
//!
//! [`Observable`]: super::Observable

use std::cell::RefCell;
use std::marker::PhantomData;

type Deferred = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchContext {
    depth: u32,
    pending: Vec<(usize, Deferred)>,
}

thread_local! {
    static BATCH: RefCell<BatchContext> = RefCell::new(BatchContext::default());
}

/// RAII guard deferring notifications until dropped.
#[must_use = "a BatchScope only batches while it is alive"]
pub struct BatchScope {
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &BATCH.with(|b| b.borrow().depth))
            .finish()
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchScope {
    pub fn new() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub fn is_active() -> bool {
        BATCH.with(|b| b.borrow().depth > 0)
    }

    /// Queued notifications in the current batch.
    #[must_use]
    pub fn pending() -> usize {
        BATCH.with(|b| b.borrow().pending.len())
    }

    /// Queue `notify` under `key` if a batch is active. Returns `false`
    /// when no batch is active and the caller must notify itself.
    pub(crate) fn defer(key: usize, notify: Deferred) -> bool {
        BATCH.with(|b| {
            let mut ctx = b.borrow_mut();
            if ctx.depth == 0 {
                return false;
            }
            if !ctx.pending.iter().any(|(k, _)| *k == key) {
                ctx.pending.push((key, notify));
            }
            true
        })
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = BATCH.with(|b| {
            let mut ctx = b.borrow_mut();
            ctx.depth = ctx.depth.saturating_sub(1);
            ctx.depth == 0
        });
        if !outermost {
            return;
        }
        loop {
            let pending = BATCH.with(|b| std::mem::take(&mut b.borrow_mut().pending));
            if pending.is_empty() {
                break;
            }
            for (_, notify) in pending {
                notify();
            }
        }
    }
}

/// Run `f` inside a batch.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::new();
    f()
}

/// Run `f` without establishing dependencies.
///
/// Dependencies are always explicit (`subscribe` / `watch`), so this only
/// marks reads that must not be turned into subscriptions; pending batch
/// notifications are left untouched.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    f()
}
