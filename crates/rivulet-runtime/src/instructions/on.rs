#![forbid(unsafe_code)]

//! `x-on:<event>.<modifiers>="c::handler ..."`: attach controller handlers
//! as event listeners.
//!
//! Each token watches its signal and re-installs the listener whenever the
//! signal changes. Modifiers:
//!
//! - `camel`: `x-on:value-changed` listens for `valueChanged`,
//! - `document`, `window`: listen on the document or the window instead of
//!   the element (at most one of them),
//! - `once`, `capture`, `passive`: listener flags,
//! - `self`: only events whose target is the element itself,
//! - `prevent`, `stop`: call `prevent_default` / `stop_propagation` first,
//! - `throttle.<ms>`: drop events for `ms` after one gets through,
//! - `debounce.<ms>`: call the handler `ms` after the last event, with a
//!   snapshot of that event.
//!
//! Both delays default to 250 ms and run on the runtime's timers, so a
//! debounced handler fires from [`Runtime::run_timers`].
//!
//! # Failure Modes
//!
//! A referenced value that does not hold a [`Handler`] fails the mount with
//! [`Error::Usage`]. If it later changes to a non-handler, the listener is
//! removed and a warning is logged.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use rivulet_core::{Document, Event, EventTarget, ListenerFlags, ListenerId, NodeId};
use tracing::warn;
use web_time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::{Bound, Reference};
use crate::modifiers::{Kind, Modifiers, Schema, camel_case};
use crate::reactive::watch;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::timer::{TimerId, Timers};
use crate::value::{Handler, Signal};
use crate::visitor::Opcode;

const DEFAULT_DELAY: Duration = Duration::from_millis(250);

const SCHEMA: Schema = &[
    ("camel", Kind::Flag),
    ("window", Kind::Flag),
    ("document", Kind::Flag),
    ("throttle", Kind::Numeric),
    ("debounce", Kind::Numeric),
    ("once", Kind::Flag),
    ("capture", Kind::Flag),
    ("passive", Kind::Flag),
    ("self", Kind::Flag),
    ("prevent", Kind::Flag),
    ("stop", Kind::Flag),
];

struct Listening {
    // Dropped first so the watcher cannot re-install after removal.
    bound: Bound,
    current: Rc<Cell<Option<ListenerId>>>,
}

impl Listening {
    fn stop(self, document: &Document) {
        drop(self.bound);
        if let Some(id) = self.current.take() {
            document.remove_event_listener(id);
        }
    }
}

/// Instruction attribute name -> token -> live listener.
#[derive(Default)]
struct OnSlot(RefCell<AHashMap<String, AHashMap<String, Listening>>>);

impl OnSlot {
    fn take(&self, attribute: &str, token: &str) -> Option<Listening> {
        let mut groups = self.0.borrow_mut();
        let group = groups.get_mut(attribute)?;
        let taken = group.remove(token);
        if group.is_empty() {
            groups.remove(attribute);
        }
        taken
    }

    fn signal(&self, attribute: &str, token: &str) -> Option<Signal> {
        self.0
            .borrow()
            .get(attribute)?
            .get(token)
            .map(|l| l.bound.signal.clone())
    }

    fn tokens(&self, attribute: &str) -> Vec<String> {
        self.0
            .borrow()
            .get(attribute)
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct Options {
    kind: String,
    target: EventTarget,
    flags: ListenerFlags,
    self_only: bool,
    prevent: bool,
    stop: bool,
    throttle: Option<Duration>,
    debounce: Option<Duration>,
}

fn delay(modifiers: &Modifiers, name: &str) -> Option<Duration> {
    if !modifiers.has(name) {
        return None;
    }
    Some(
        modifiers
            .number(name)
            .and_then(|ms| u64::try_from(ms).ok())
            .map_or(DEFAULT_DELAY, Duration::from_millis),
    )
}

impl Options {
    fn new(root: NodeId, event: &str, modifiers: &Modifiers) -> Result<Self> {
        let (window, document) = (modifiers.has("window"), modifiers.has("document"));
        if window && document {
            return Err(Error::syntax("`window` and `document` modifiers are exclusive"));
        }
        if modifiers.has("self") && (window || document) {
            return Err(Error::syntax(
                "`self` cannot be combined with `window` or `document`",
            ));
        }
        let mut flags = ListenerFlags::empty();
        flags.set(ListenerFlags::ONCE, modifiers.has("once"));
        flags.set(ListenerFlags::CAPTURE, modifiers.has("capture"));
        flags.set(ListenerFlags::PASSIVE, modifiers.has("passive"));
        Ok(Self {
            kind: if modifiers.has("camel") {
                camel_case(event)
            } else {
                event.to_owned()
            },
            target: if window {
                EventTarget::Window
            } else if document {
                EventTarget::Document
            } else {
                EventTarget::Node(root)
            },
            flags,
            self_only: modifiers.has("self"),
            prevent: modifiers.has("prevent"),
            stop: modifiers.has("stop"),
            throttle: delay(modifiers, "throttle"),
            debounce: delay(modifiers, "debounce"),
        })
    }
}

/// Rate limiting state of one installed listener.
struct Pacing {
    timers: Weak<Timers>,
    throttle: Option<Duration>,
    debounce: Option<Duration>,
    last: Cell<Option<Instant>>,
    pending: Cell<Option<TimerId>>,
}

impl Pacing {
    /// Whether a throttled listener lets this event through.
    fn admit(&self, timers: &Timers) -> bool {
        let Some(window) = self.throttle else {
            return true;
        };
        let now = timers.now();
        if self
            .last
            .get()
            .is_some_and(|last| now.duration_since(last) < window)
        {
            return false;
        }
        self.last.set(Some(now));
        true
    }

    fn deliver(&self, handler: &Handler, event: &Event) {
        let Some(timers) = self.timers.upgrade() else {
            return;
        };
        if !self.admit(&timers) {
            return;
        }
        let Some(wait) = self.debounce else {
            handler.call(event);
            return;
        };
        if let Some(previous) = self.pending.take() {
            timers.clear(previous);
        }
        let (handler, snapshot) = (handler.clone(), event.clone());
        self.pending
            .set(Some(timers.set_timeout(wait, move || handler.call(&snapshot))));
    }
}

fn install(
    document: &Document,
    root: NodeId,
    options: &Options,
    timers: &Weak<Timers>,
    handler: Handler,
) -> ListenerId {
    let (self_only, prevent, stop) = (options.self_only, options.prevent, options.stop);
    let pacing = Pacing {
        timers: Weak::clone(timers),
        throttle: options.throttle,
        debounce: options.debounce,
        last: Cell::new(None),
        pending: Cell::new(None),
    };
    document.add_event_listener(options.target, &options.kind, options.flags, move |event| {
        if stop {
            event.stop_propagation();
        }
        if prevent {
            event.prevent_default();
        }
        if self_only && event.target() != root {
            return;
        }
        pacing.deliver(&handler, event);
    })
}

fn listen(
    document: &Document,
    root: NodeId,
    options: Options,
    timers: Weak<Timers>,
    signal: Signal,
) -> Listening {
    let current: Rc<Cell<Option<ListenerId>>> = Rc::default();
    let weak = document.downgrade();
    let slot = Rc::clone(&current);
    let subscription = watch(&signal, move |value| {
        let Some(document) = weak.upgrade() else {
            return;
        };
        if let Some(id) = slot.take() {
            document.remove_event_listener(id);
        }
        match value.as_handler() {
            Some(handler) => slot.set(Some(install(
                &document,
                root,
                &options,
                &timers,
                handler.clone(),
            ))),
            None => warn!(
                element = root.raw(),
                event = %options.kind,
                "value is not an event handler; listener removed"
            ),
        }
    });
    Listening {
        bound: Bound::new(signal, subscription),
        current,
    }
}

#[derive(Debug, Default)]
pub struct On;

impl Worker for On {
    fn name(&self) -> &str {
        "on"
    }

    fn priority(&self) -> i32 {
        4
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let event = instruction
            .argument
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                Error::syntax(format!(
                    "`{}` needs an event argument",
                    instruction.attribute.name
                ))
            })?;
        let modifiers = Modifiers::parse(&instruction.modifiers, SCHEMA)?;
        let document = runtime.document();
        let root = scope.root();
        let options = Options::new(root, event, &modifiers)?;
        let attribute = instruction.attribute.name.as_str();
        let tokens = instruction.tokens();
        let slot = document.ext_or_insert_with(root, OnSlot::default);

        for stale in slot.tokens(attribute) {
            if !tokens.contains(&stale.as_str()) {
                if let Some(listening) = slot.take(attribute, &stale) {
                    listening.stop(document);
                }
            }
        }

        for token in tokens {
            let reference = Reference::parse(token)?;
            let existing = slot.signal(attribute, token);
            let Some(droplet) = reference.droplet(document, scope) else {
                if let Some(listening) = slot.take(attribute, token) {
                    listening.stop(document);
                }
                continue;
            };
            let signal = reference.signal(&droplet)?;
            if existing.is_some_and(|s| s.ptr_eq(&signal)) {
                continue;
            }
            if let Some(listening) = slot.take(attribute, token) {
                listening.stop(document);
            }
            if signal.with(|v| v.as_handler().is_none()) {
                return Err(Error::usage(format!(
                    "`{token}` does not hold an event handler"
                )));
            }
            let timers = Rc::downgrade(runtime.timers());
            let listening = listen(document, root, options.clone(), timers, signal);
            slot.0
                .borrow_mut()
                .entry(attribute.to_owned())
                .or_default()
                .insert(token.to_owned(), listening);
        }
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let document = runtime.document();
        let Some(slot) = document.ext::<OnSlot>(scope.root()) else {
            return Ok(Flow::Continue);
        };
        let group = slot.0.borrow_mut().remove(&instruction.attribute.name);
        for (_, listening) in group.into_iter().flatten() {
            listening.stop(document);
        }
        Ok(Flow::Continue)
    }
}
