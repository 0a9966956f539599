#![forbid(unsafe_code)]

//! Rivulet public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use rivulet_core as core;
pub use rivulet_runtime as runtime;

pub mod prelude {
    pub use rivulet_core::{Document, Event, NodeId};
    pub use rivulet_runtime::{
        Config, Error, Handler, HookOptions, Mounted, Result, Runtime, Signal, Value, inject,
        mount, provide, setup, unmount,
    };

    pub use rivulet_core as core;
    pub use rivulet_runtime as runtime;
}
