#![forbid(unsafe_code)]

//! Controller hook API.
//!
//! The free functions here ([`setup`], [`mount`], [`unmount`], [`provide`],
//! [`inject`]) act on the *active* droplet: the one whose factory or hook is
//! running on this thread. The active slot is a single thread-local value,
//! set for the duration of a factory call or a hook run and cleared when the
//! guard drops, including on unwind.
//!
//! # Failure Modes
//!
//! - Any of the API functions called with no active droplet returns
//!   [`Error::Usage`].
//! - A hook that re-enters itself (for example by triggering a nested hook
//!   run of the same droplet) returns [`Error::Usage`] instead of aliasing
//!   the callback.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::droplet::{Droplet, HookFn, HookKind, HookOptions, Mounted};
use crate::error::{Error, Result};
use crate::reactive::BatchScope;
use crate::runtime::Runtime;
use crate::value::{Signal, Value};

thread_local! {
    static ACTIVE: RefCell<Option<Droplet>> = const { RefCell::new(None) };
}

/// Marks a droplet active until dropped.
pub(crate) struct Activation(());

impl Activation {
    pub(crate) fn enter(droplet: &Droplet) -> Self {
        ACTIVE.with(|slot| *slot.borrow_mut() = Some(droplet.clone()));
        Self(())
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        clear_active();
    }
}

pub(crate) fn clear_active() {
    ACTIVE.with(|slot| slot.borrow_mut().take());
}

/// The droplet whose factory or hook is currently running.
#[must_use]
pub fn active() -> Option<Droplet> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

fn require_active(api: &str) -> Result<Droplet> {
    active().ok_or_else(|| Error::usage(format!("`{api}` called outside a controller")))
}

fn hook(mut f: impl FnMut() -> Result<Mounted> + 'static) -> HookFn {
    Rc::new(RefCell::new(move || f()))
}

/// Run `callback` once, after the first mount traversal of this droplet has
/// finished and before its mount hooks.
pub fn setup(callback: impl FnOnce() -> Result<()> + 'static) -> Result<()> {
    let droplet = require_active("setup")?;
    let mut slot = Some(callback);
    droplet.add_hook(
        HookKind::Setup,
        true,
        hook(move || {
            if let Some(f) = slot.take() {
                f()?;
            }
            Ok(Mounted::Done)
        }),
    );
    Ok(())
}

/// Run `callback` every time the droplet is mounted (once with
/// [`HookOptions::ONCE`]). Returning [`Mounted::teardown`] registers a
/// one-shot unmount hook.
pub fn mount<R: Into<Mounted>>(
    mut callback: impl FnMut() -> Result<R> + 'static,
    options: HookOptions,
) -> Result<()> {
    let droplet = require_active("mount")?;
    droplet.add_hook(
        HookKind::Mount,
        options.once,
        hook(move || callback().map(Into::into)),
    );
    Ok(())
}

pub fn unmount(
    mut callback: impl FnMut() -> Result<()> + 'static,
    options: HookOptions,
) -> Result<()> {
    let droplet = require_active("unmount")?;
    droplet.add_hook(
        HookKind::Unmount,
        options.once,
        hook(move || callback().map(|()| Mounted::Done)),
    );
    Ok(())
}

/// Create a named value on the active droplet. Each name can be provided once.
pub fn provide(name: &str, initial: impl Into<Value>) -> Result<Signal> {
    require_active("provide")?.provide(name, initial.into())
}

/// A value provided earlier by the active droplet.
pub fn inject(name: &str) -> Result<Option<Signal>> {
    Ok(require_active("inject")?.value(name))
}

/// Run every hook of `kind` on a snapshot of the list.
pub(crate) fn run_hooks(droplet: &Droplet, kind: HookKind) -> Result<()> {
    let _active = Activation::enter(droplet);
    for entry in droplet.snapshot(kind) {
        let outcome = {
            let _batch = BatchScope::new();
            let mut callback = entry
                .callback
                .try_borrow_mut()
                .map_err(|_| Error::usage(format!("{kind:?} hook re-entered while running")))?;
            (&mut *callback)()?
        };
        if entry.once {
            droplet.remove_hook(kind, entry.id);
        }
        if let Mounted::Teardown(teardown) = outcome {
            let mut slot = Some(teardown);
            droplet.add_hook(
                HookKind::Unmount,
                true,
                hook(move || {
                    if let Some(f) = slot.take() {
                        f()?;
                    }
                    Ok(Mounted::Done)
                }),
            );
        }
    }
    Ok(())
}

pub(crate) fn enqueue_setup(runtime: &Runtime, droplet: &Droplet) {
    let droplet = droplet.clone();
    runtime
        .scheduler()
        .controller(move || run_hooks(&droplet, HookKind::Setup));
}

pub(crate) fn enqueue_mount(runtime: &Runtime, droplet: &Droplet) {
    droplet.set_mounted(true);
    debug!(controller = droplet.name(), root = droplet.root().raw(), "mount queued");
    let droplet = droplet.clone();
    runtime
        .scheduler()
        .controller(move || run_hooks(&droplet, HookKind::Mount));
}

pub(crate) fn enqueue_unmount(runtime: &Runtime, droplet: &Droplet) {
    droplet.set_mounted(false);
    debug!(controller = droplet.name(), root = droplet.root().raw(), "unmount queued");
    let droplet = droplet.clone();
    runtime
        .scheduler()
        .controller(move || run_hooks(&droplet, HookKind::Unmount));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ControllerRecord;
    use rivulet_core::Document;
    use std::cell::Cell;

    fn droplet() -> Droplet {
        let doc = Document::new();
        Droplet::new(Rc::new(ControllerRecord::new("c", |_| Ok(()))), doc.body())
    }

    #[test]
    fn api_requires_an_active_droplet() {
        assert!(matches!(setup(|| Ok(())), Err(Error::Usage(_))));
        assert!(matches!(mount(|| Ok(()), HookOptions::default()), Err(Error::Usage(_))));
        assert!(matches!(unmount(|| Ok(()), HookOptions::ONCE), Err(Error::Usage(_))));
        assert!(matches!(provide("v", 1), Err(Error::Usage(_))));
        assert!(matches!(inject("v"), Err(Error::Usage(_))));
    }

    #[test]
    fn activation_clears_on_drop() {
        let d = droplet();
        {
            let _guard = Activation::enter(&d);
            assert!(active().unwrap().ptr_eq(&d));
            provide("v", "x").unwrap();
            assert!(inject("v").unwrap().is_some());
            assert!(inject("w").unwrap().is_none());
        }
        assert!(active().is_none());
    }

    #[test]
    fn once_hooks_fire_once_and_teardown_becomes_unmount() {
        let d = droplet();
        let every = Rc::new(Cell::new(0));
        let once = Rc::new(Cell::new(0));
        let torn = Rc::new(Cell::new(0));
        {
            let _guard = Activation::enter(&d);
            let e = Rc::clone(&every);
            let t = Rc::clone(&torn);
            mount(
                move || {
                    e.set(e.get() + 1);
                    let t = Rc::clone(&t);
                    Ok(Mounted::teardown(move || {
                        t.set(t.get() + 1);
                        Ok(())
                    }))
                },
                HookOptions::default(),
            )
            .unwrap();
            let o = Rc::clone(&once);
            mount(
                move || {
                    o.set(o.get() + 1);
                    Ok(())
                },
                HookOptions::ONCE,
            )
            .unwrap();
        }

        for _ in 0..2 {
            run_hooks(&d, HookKind::Mount).unwrap();
            run_hooks(&d, HookKind::Unmount).unwrap();
        }
        assert_eq!(every.get(), 2);
        assert_eq!(once.get(), 1);
        assert_eq!(torn.get(), 2);
        assert_eq!(d.hook_count(HookKind::Unmount), 0);
        assert!(active().is_none());
    }

    #[test]
    fn hook_added_during_a_run_waits_for_the_next_one() {
        let d = droplet();
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        {
            let _guard = Activation::enter(&d);
            let (first, tail) = (Rc::clone(&order), Rc::clone(&order));
            mount(
                move || {
                    first.borrow_mut().push("first");
                    let added = Rc::clone(&first);
                    mount(
                        move || {
                            added.borrow_mut().push("added");
                            Ok(())
                        },
                        HookOptions::default(),
                    )
                },
                HookOptions::ONCE,
            )
            .unwrap();
            mount(
                move || {
                    tail.borrow_mut().push("tail");
                    Ok(())
                },
                HookOptions::default(),
            )
            .unwrap();
        }

        run_hooks(&d, HookKind::Mount).unwrap();
        assert_eq!(*order.borrow(), ["first", "tail"]);
        assert_eq!(d.hook_count(HookKind::Mount), 2);

        run_hooks(&d, HookKind::Mount).unwrap();
        assert_eq!(*order.borrow(), ["first", "tail", "tail", "added"]);
    }

    #[test]
    fn hook_error_stops_the_run_and_clears_active() {
        let d = droplet();
        let after = Rc::new(Cell::new(false));
        {
            let _guard = Activation::enter(&d);
            unmount(|| Err(Error::callback("boom")), HookOptions::ONCE).unwrap();
            let a = Rc::clone(&after);
            unmount(
                move || {
                    a.set(true);
                    Ok(())
                },
                HookOptions::default(),
            )
            .unwrap();
        }
        assert!(run_hooks(&d, HookKind::Unmount).is_err());
        assert!(!after.get());
        assert!(active().is_none());
        // failed once-hooks stay registered
        assert_eq!(d.hook_count(HookKind::Unmount), 2);
    }
}
