#![forbid(unsafe_code)]

//! `x-controller="a b"`: bind registered controllers to an element.
//!
//! Droplets are kept per element for the element's lifetime. Dropping a
//! name from the attribute unmounts its droplet and hides it from the
//! scope; adding the name back mounts the same droplet again, with the same
//! values, without running setup a second time.

use std::cell::RefCell;

use rivulet_core::NodeId;
use tracing::{debug, trace};

use crate::droplet::Droplet;
use crate::error::Result;
use crate::instruction::{Flow, Instruction, Worker};
use crate::lifecycle::{self, Activation};
use crate::reactive::batch;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::visitor::Opcode;

#[derive(Default)]
struct Controllers(RefCell<Vec<Droplet>>);

impl Controllers {
    fn find(&self, name: &str) -> Option<Droplet> {
        self.0.borrow().iter().find(|d| d.name() == name).cloned()
    }

    fn snapshot(&self) -> Vec<Droplet> {
        self.0.borrow().clone()
    }
}

/// Every droplet created on `element`, mounted or not.
#[must_use]
pub fn droplets(runtime: &Runtime, element: NodeId) -> Vec<Droplet> {
    runtime
        .document()
        .ext::<Controllers>(element)
        .map(|c| c.snapshot())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct Controller;

impl Controller {
    fn release(runtime: &Runtime, scope: &Scope, droplet: &Droplet) {
        if droplet.is_mounted() {
            lifecycle::enqueue_unmount(runtime, droplet);
        }
        let visible = scope
            .controller(runtime.document(), droplet.name())
            .is_some_and(|d| d.ptr_eq(droplet));
        if visible {
            scope.remove_controller(droplet.name());
        }
    }

    fn initialize(
        runtime: &Runtime,
        scope: &Scope,
        controllers: &Controllers,
        name: &str,
    ) -> Result<()> {
        let Some(record) = runtime.registry().get(name) else {
            trace!(controller = name, "controller not registered yet");
            return Ok(());
        };
        let root = scope.root();
        let droplet = Droplet::new(record, root);
        {
            let _active = Activation::enter(&droplet);
            batch(|| droplet.record().instantiate(root))?;
        }
        debug!(controller = name, root = root.raw(), "droplet created");

        controllers.0.borrow_mut().push(droplet.clone());
        scope.insert_controller(droplet.clone());
        lifecycle::enqueue_setup(runtime, &droplet);
        lifecycle::enqueue_mount(runtime, &droplet);
        Ok(())
    }
}

impl Worker for Controller {
    fn name(&self) -> &str {
        "controller"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let tokens = instruction.tokens();
        let controllers = runtime
            .document()
            .ext_or_insert_with(scope.root(), Controllers::default);

        for droplet in controllers.snapshot() {
            if !tokens.contains(&droplet.name()) {
                Self::release(runtime, scope, &droplet);
            }
        }

        for token in tokens {
            match controllers.find(token) {
                Some(droplet) => {
                    if !droplet.is_mounted() {
                        lifecycle::enqueue_mount(runtime, &droplet);
                        scope.insert_controller(droplet);
                    }
                }
                None => Self::initialize(runtime, scope, &controllers, token)?,
            }
        }
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        for droplet in droplets(runtime, scope.root()) {
            Self::release(runtime, scope, &droplet);
        }
        Ok(Flow::Continue)
    }
}
