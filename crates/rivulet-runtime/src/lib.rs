#![forbid(unsafe_code)]

//! Runtime: attribute-driven reactivity over a [`rivulet_core::Document`].
//!
//! Authors annotate elements with prefixed attributes (`x-controller`,
//! `x-text`, `x-on:click`, ...). A [`Runtime`] observes document subtrees,
//! turns each mutation batch into a deduplicated list of work items, and
//! walks the affected elements applying instruction [`Worker`]s in priority
//! order. Controllers registered with [`Runtime::register`] are instantiated
//! per element as [`Droplet`]s, provide reactive values, and run lifecycle
//! hooks after each traversal.
//!
//! # Layout
//!
//! - [`attribute`], [`modifiers`]: pure attribute-name parsing.
//! - [`instruction`]: workers and the priority table.
//! - [`scope`]: per-element controller visibility.
//! - [`droplet`], [`lifecycle`], [`registry`]: controllers and their hooks.
//! - [`scheduler`]: hook tasks drained once per tick.
//! - [`timer`]: host-driven timers behind `debounce` and `throttle`.
//! - [`visitor`]: traversal; [`Runtime::observe`] and friends reconcile
//!   mutation batches.
//! - [`reactive`], [`value`]: the value substrate.
//! - [`instructions`]: the built-in workers.
//!
//! # Threading
//!
//! Everything is single-threaded: runtime, document and values use
//! `Rc`/`RefCell` and must stay on the thread that created them.

pub mod attribute;
pub mod config;
pub mod droplet;
pub mod error;
pub mod instruction;
pub mod instructions;
pub mod lifecycle;
pub mod modifiers;
mod observer;
pub mod reactive;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod timer;
pub mod value;
pub mod visitor;

pub use config::{Config, DEFAULT_PREFIX};
pub use droplet::{Droplet, HookKind, HookOptions, Mounted};
pub use error::{Error, Result};
pub use instruction::{Flow, FnWorker, Instruction, InstructionTable, Worker};
pub use lifecycle::{active, inject, mount, provide, setup, unmount};
pub use reactive::{BatchScope, Observable, Subscription, batch, untracked, watch};
pub use registry::{ControllerRecord, Registry};
pub use runtime::Runtime;
pub use scope::Scope;
pub use timer::{LabClock, TimerId};
pub use value::{Handler, Signal, Value};
pub use visitor::Opcode;
