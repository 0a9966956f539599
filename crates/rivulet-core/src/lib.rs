#![forbid(unsafe_code)]

//! Core: the DOM host consumed by the Rivulet runtime.
//!
//! This crate models the small slice of a browser document the runtime needs:
//!
//! - [`Document`]: a shared, single-threaded node arena with element and text
//!   nodes, ordered attributes, and live `children` / `parent_element` walks.
//! - [`MutationObserver`]: per-observer queues of [`MutationRecord`]s for
//!   registered subtrees, drained with [`MutationObserver::take_records`].
//! - [`Event`]: capture/bubble dispatch of named events to listeners.
//! - [`markup`]: HTML fragment parsing and serialization through `html5ever`,
//!   used for `inner_html` and test fixtures.
//!
//! # Invariants
//!
//! 1. A node has at most one parent; appending a node that already has a
//!    parent moves it (one removal record, then one addition record).
//! 2. A node is connected iff its ancestor chain reaches [`Document::body`].
//! 3. Records are queued in mutation order, per observer.
//! 4. No `Document` method holds an internal borrow while running user
//!   callbacks, so listeners may freely mutate the document.

pub mod dom;
pub mod error;
pub mod event;
pub mod markup;
pub mod mutation;

pub use dom::{Attribute, Document, NodeId, NodeKind, WeakDocument};
pub use error::DomError;
pub use event::{Event, EventTarget, ListenerFlags, ListenerId};
pub use mutation::{MutationObserver, MutationRecord};
