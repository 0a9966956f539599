#![forbid(unsafe_code)]

//! `controller::value` references shared by the value-consuming workers.

use rivulet_core::Document;

use crate::droplet::Droplet;
use crate::error::{Error, Result};
use crate::reactive::Subscription;
use crate::scope::Scope;
use crate::value::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub controller: &'a str,
    pub value: &'a str,
}

impl<'a> Reference<'a> {
    pub fn parse(token: &'a str) -> Result<Self> {
        match token.split_once("::") {
            Some((controller, value)) if !controller.is_empty() && !value.is_empty() => {
                Ok(Self { controller, value })
            }
            _ => Err(Error::syntax(format!(
                "expected `controller::value`, found `{token}`"
            ))),
        }
    }

    /// The droplet visible from `scope` under the referenced name.
    #[must_use]
    pub fn droplet(&self, document: &Document, scope: &Scope) -> Option<Droplet> {
        scope.controller(document, self.controller)
    }

    /// The referenced value on `droplet`; missing values are reference errors.
    pub fn signal(&self, droplet: &Droplet) -> Result<Signal> {
        droplet
            .value(self.value)
            .ok_or_else(|| Error::reference(self.value, self.controller))
    }
}

/// A live watcher on one signal.
pub(crate) struct Bound {
    pub(crate) signal: Signal,
    _subscription: Subscription,
}

impl Bound {
    pub(crate) fn new(signal: Signal, subscription: Subscription) -> Self {
        Self {
            signal,
            _subscription: subscription,
        }
    }
}
