use std::fmt::Display;

use rivulet_core::DomError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An idle-only operation was attempted during a tick, or the reverse.
    #[error("state error: {0}")]
    State(String),

    #[error("reference error: `{value}` is not provided by controller `{controller}`")]
    Reference { value: String, controller: String },

    /// Malformed instruction value or modifier list.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Lifecycle API used outside a controller, or a bad argument.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    /// Failure reported by user code (factories, hooks, tasks).
    #[error("{0}")]
    Callback(String),
}

impl Error {
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    #[must_use]
    pub fn reference(value: impl Into<String>, controller: impl Into<String>) -> Self {
        Self::Reference {
            value: value.into(),
            controller: controller.into(),
        }
    }

    /// Wrap an arbitrary failure raised by user code.
    #[must_use]
    pub fn callback(message: impl Display) -> Self {
        Self::Callback(message.to_string())
    }
}
