#![forbid(unsafe_code)]

//! Dynamic values carried by controller signals.

use std::fmt;
use std::rc::Rc;

use rivulet_core::{Event, NodeId};

use crate::reactive::Observable;

/// A reactive controller value.
pub type Signal = Observable<Value>;

/// Event handler stored in a [`Value`]. Equality is identity.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn(&Event)>);

impl Handler {
    pub fn new(f: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, event: &Event) {
        (self.0)(event);
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Element(NodeId),
    Elements(Vec<NodeId>),
    Handler(Handler),
}

impl Value {
    /// `Undefined`, `Null`, `false`, `0`, `NaN` and `""` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Element(_) | Self::Elements(_) | Self::Handler(_) => true,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_element(&self) -> Option<NodeId> {
        match self {
            Self::Element(node) => Some(*node),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_elements(&self) -> Option<&[NodeId]> {
        match self {
            Self::Elements(nodes) => Some(nodes),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_handler(&self) -> Option<&Handler> {
        match self {
            Self::Handler(h) => Some(h),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text written into the document for this value. Absent values render
    /// as the empty string; nodes and handlers have no textual form.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Undefined | Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Element(_) | Self::Elements(_) | Self::Handler(_) => String::new(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        // negative zero prints as zero
        "0".to_owned()
    } else {
        n.to_string()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Self::Element(v)
    }
}

impl From<Vec<NodeId>> for Value {
    fn from(v: Vec<NodeId>) -> Self {
        Self::Elements(v)
    }
}

impl From<Handler> for Value {
    fn from(v: Handler) -> Self {
        Self::Handler(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
