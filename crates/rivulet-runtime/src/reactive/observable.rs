#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the panic propagates to the writer; subscribers
//!   after it in registration order are not called for that change.
//! - **Subscriber writes the same observable**: allowed. The nested write
//!   notifies synchronously (or is deferred by an active batch); no internal
//!   borrow is held while subscribers run.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::batch::BatchScope;

type Callback<T> = dyn Fn(&T);

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A shared value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

/// RAII guard for a subscriber callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _callback: Rc<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the value without cloning it. `f` must not write to this
    /// observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Mutate in place. Always bumps the version and notifies.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut inner = self.inner.borrow_mut();
            f(&mut inner.value);
            inner.version += 1;
        }
        self.notify();
    }

    /// Register `callback`, called with the new value after every change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription {
            _callback: Rc::new(strong),
        }
    }

    /// Live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn key(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    fn notify(&self) {
        let this = self.clone();
        if BatchScope::defer(self.key(), Box::new(move || this.notify_now())) {
            return;
        }
        self.notify_now();
    }

    fn notify_now(&self) {
        let (value, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<Rc<Callback<T>>> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (inner.value.clone(), callbacks)
        };
        for callback in callbacks {
            callback(&value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Replace the value. Setting an equal value is a no-op.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }
}

impl<T: Clone + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Run `f` with the current value now and after every change.
///
/// This is the effect primitive: dropping the returned subscription
/// disposes the effect.
pub fn watch<T: Clone + 'static>(
    observable: &Observable<T>,
    f: impl Fn(&T) + 'static,
) -> Subscription {
    let f = Rc::new(f);
    let current = observable.get();
    f(&current);
    let g = Rc::clone(&f);
    observable.subscribe(move |v| g(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_equal_value_is_a_noop() {
        let obs = Observable::new(1);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.set(1);
        assert_eq!((obs.version(), hits.get()), (0, 0));
        obs.set(2);
        assert_eq!((obs.version(), hits.get()), (1, 1));
    }

    #[test]
    fn update_always_notifies() {
        let obs = Observable::new(vec![1]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v: &Vec<i32>| s.borrow_mut().push(v.len()));
        obs.update(|v| v.push(2));
        obs.update(|_| {});
        assert_eq!(*seen.borrow(), vec![2, 2]);
    }

    #[test]
    fn dropped_subscription_never_fires() {
        let obs = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let obs = Observable::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let subs: Vec<_> = (0..3)
            .map(|i| {
                let o = Rc::clone(&order);
                obs.subscribe(move |_| o.borrow_mut().push(i))
            })
            .collect();
        obs.set(1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn watch_runs_immediately_and_on_change() {
        let obs = Observable::new("a".to_owned());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = watch(&obs, move |v: &String| s.borrow_mut().push(v.clone()));
        obs.set("b".into());
        drop(sub);
        obs.set("c".into());
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn subscriber_may_write_back() {
        let obs = Observable::new(0);
        let handle = obs.clone();
        let _sub = obs.subscribe(move |v| {
            if *v < 3 {
                handle.set(v + 1);
            }
        });
        obs.set(1);
        assert_eq!(obs.get(), 3);
    }
}
