#![forbid(unsafe_code)]

//! `x-model="c::value ..."`: copy a form control's state into values.
//!
//! The control is read once at mount and again on every `input` event
//! (`change` for `select`, `option`, checkboxes, radios and color inputs).
//! The document has no form properties, so state comes from attributes:
//! `value` (or the text of a `textarea` / `option`), `checked` and
//! `selected`.
//!
//! | control                    | written value                                  |
//! |----------------------------|------------------------------------------------|
//! | text-like input, textarea  | the current value                              |
//! | `number`, `range`          | the value parsed as a number                   |
//! | `radio`                    | the value, only while checked                  |
//! | `checkbox`                 | the value when checked and the target is unset; unset again when unchecked |
//! | `select`                   | the value of the selected option, or the first |
//!
//! Modifiers: `number` parses every control's value as a number (`NaN` when
//! it does not start with one), `once` listens for a single event.
//!
//! # Failure Modes
//!
//! - Any other element, a `file` input and a `select` with `multiple` fail
//!   the mount with [`Error::Usage`].
//! - A referenced value missing from a visible controller is a reference
//!   error; a controller that is not visible is skipped.

use std::cell::RefCell;

use rivulet_core::{Document, EventTarget, ListenerFlags, ListenerId, NodeId};
use tracing::debug;

use crate::error::{Error, Result};
use crate::instruction::{Flow, Instruction, Worker};
use crate::instructions::binding::Reference;
use crate::modifiers::{Kind, Modifiers, Schema};
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::value::{Signal, Value};
use crate::visitor::Opcode;

const SCHEMA: Schema = &[("once", Kind::Flag), ("number", Kind::Flag)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Text,
    TextArea,
    Numeric,
    Radio,
    Checkbox,
    Select,
    Option,
}

impl Control {
    fn of(document: &Document, root: NodeId) -> Result<Self> {
        let tag = document.tag_name(root).unwrap_or_default();
        let control = match tag.as_str() {
            "textarea" => Self::TextArea,
            "option" => Self::Option,
            "select" if document.has_attribute(root, "multiple") => {
                return Err(Error::usage("`x-model` does not support `select multiple`"));
            }
            "select" => Self::Select,
            "input" => {
                let kind = document
                    .get_attribute(root, "type")
                    .map(|t| t.trim().to_ascii_lowercase())
                    .unwrap_or_default();
                match kind.as_str() {
                    "number" | "range" => Self::Numeric,
                    "radio" => Self::Radio,
                    "checkbox" => Self::Checkbox,
                    "file" => {
                        return Err(Error::usage("`x-model` does not support file inputs"));
                    }
                    _ => Self::Text,
                }
            }
            other => {
                return Err(Error::usage(format!(
                    "`x-model` needs a form control, found `<{other}>`"
                )));
            }
        };
        Ok(control)
    }

    fn event(self, document: &Document, root: NodeId) -> &'static str {
        let color = document
            .get_attribute(root, "type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("color"));
        match self {
            Self::Select | Self::Option | Self::Checkbox | Self::Radio => "change",
            Self::Text if color => "change",
            _ => "input",
        }
    }
}

fn option_value(document: &Document, option: NodeId) -> String {
    document
        .get_attribute(option, "value")
        .unwrap_or_else(|| document.text_content(option).trim().to_owned())
}

fn raw_value(document: &Document, root: NodeId, control: Control) -> String {
    match control {
        Control::TextArea => document.text_content(root),
        Control::Option => option_value(document, root),
        Control::Select => {
            let options: Vec<NodeId> = document
                .descendants(root)
                .into_iter()
                .filter(|n| document.tag_name(*n).as_deref() == Some("option"))
                .collect();
            options
                .iter()
                .find(|o| document.has_attribute(**o, "selected"))
                .or_else(|| options.first())
                .map(|o| option_value(document, *o))
                .unwrap_or_default()
        }
        Control::Radio | Control::Checkbox => document
            .get_attribute(root, "value")
            .unwrap_or_else(|| "on".to_owned()),
        Control::Text | Control::Numeric => {
            document.get_attribute(root, "value").unwrap_or_default()
        }
    }
}

/// Longest leading decimal literal of `s`, `NaN` when there is none.
fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };
    let whole = digits(end);
    end += whole;
    let mut fraction = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction = digits(end + 1);
        if whole + fraction > 0 {
            end += 1 + fraction;
        }
    }
    if whole + fraction == 0 {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent = digits(end + 1 + sign);
        if exponent > 0 {
            end += 1 + sign + exponent;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

struct ControlSync {
    control: Control,
    numeric: bool,
    signals: Vec<Signal>,
}

impl ControlSync {
    fn read(&self, document: &Document, root: NodeId) -> Value {
        let raw = raw_value(document, root, self.control);
        if self.numeric || self.control == Control::Numeric {
            Value::Number(parse_float(&raw))
        } else {
            Value::Text(raw)
        }
    }

    fn run(&self, document: &Document, root: NodeId) {
        let checked = document.has_attribute(root, "checked");
        match self.control {
            Control::Radio if !checked => {}
            Control::Checkbox => {
                let value = self.read(document, root);
                for signal in &self.signals {
                    let current = signal.get();
                    if checked && current.is_undefined() {
                        signal.set(value.clone());
                    } else if !checked && current == value {
                        signal.set(Value::Undefined);
                    }
                }
            }
            _ => {
                let value = self.read(document, root);
                for signal in &self.signals {
                    signal.set(value.clone());
                }
            }
        }
    }
}

struct Modeled {
    key: String,
    signals: Vec<Signal>,
    listener: ListenerId,
}

impl Modeled {
    fn matches(&self, key: &str, signals: &[Signal]) -> bool {
        self.key == key
            && self.signals.len() == signals.len()
            && self.signals.iter().zip(signals).all(|(a, b)| a.ptr_eq(b))
    }
}

#[derive(Default)]
struct ModelSlot(RefCell<Option<Modeled>>);

impl ModelSlot {
    fn stop(&self, document: &Document) {
        if let Some(modeled) = self.0.borrow_mut().take() {
            document.remove_event_listener(modeled.listener);
        }
    }
}

#[derive(Debug, Default)]
pub struct Model;

impl Worker for Model {
    fn name(&self) -> &str {
        "model"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn mount(
        &self,
        runtime: &Runtime,
        _opcode: Opcode,
        instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let document = runtime.document();
        let root = scope.root();
        let control = Control::of(document, root)?;
        let modifiers = Modifiers::parse(&instruction.modifiers, SCHEMA)?;

        let mut signals = Vec::new();
        for token in instruction.tokens() {
            let reference = Reference::parse(token)?;
            let Some(droplet) = reference.droplet(document, scope) else {
                continue;
            };
            signals.push(reference.signal(&droplet)?);
        }

        let key = format!(
            "{}={}",
            instruction.attribute.name,
            instruction.value().unwrap_or_default().trim()
        );
        let slot = document.ext_or_insert_with(root, ModelSlot::default);
        if slot
            .0
            .borrow()
            .as_ref()
            .is_some_and(|m| m.matches(&key, &signals))
        {
            return Ok(Flow::Continue);
        }
        slot.stop(document);

        let sync = ControlSync {
            control,
            numeric: modifiers.has("number"),
            signals: signals.clone(),
        };
        sync.run(document, root);

        let event = control.event(document, root);
        let mut flags = ListenerFlags::empty();
        flags.set(ListenerFlags::ONCE, modifiers.has("once"));
        let weak = document.downgrade();
        let listener =
            document.add_event_listener(EventTarget::Node(root), event, flags, move |_| {
                if let Some(document) = weak.upgrade() {
                    sync.run(&document, root);
                }
            });
        debug!(element = root.raw(), event, values = signals.len(), "model listening");
        *slot.0.borrow_mut() = Some(Modeled {
            key,
            signals,
            listener,
        });
        Ok(Flow::Continue)
    }

    fn unmount(
        &self,
        runtime: &Runtime,
        _instruction: &Instruction,
        scope: &Scope,
    ) -> Result<Flow> {
        let document = runtime.document();
        if let Some(slot) = document.ext::<ModelSlot>(scope.root()) {
            slot.stop(document);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_float_reads_the_leading_number() {
        assert_eq!(parse_float("42"), 42.0);
        assert_eq!(parse_float("  -3.5px"), -3.5);
        assert_eq!(parse_float(".5"), 0.5);
        assert_eq!(parse_float("5."), 5.0);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        for junk in ["", "abc", ".", "-", "e5"] {
            assert!(parse_float(junk).is_nan(), "{junk:?}");
        }
    }
}
