#![forbid(unsafe_code)]

//! Attribute → instruction parsing.
//!
//! An instruction attribute has the shape
//! `<prefix><name>[:<argument>][.<modifier>]*`, e.g. `x-on:click.once.prevent`.
//! The name is split off at the first `:`; modifiers are the `.`-separated
//! tail of the whole attribute name.
//!
//! Both operations are pure and idempotent.

use rivulet_core::Attribute;

use crate::instruction::Instruction;

/// Keep attributes whose name starts with `prefix`, in declaration order.
#[must_use]
pub fn filter(attributes: &[Attribute], prefix: &str) -> Vec<Attribute> {
    attributes
        .iter()
        .filter(|a| is_instruction(&a.name, prefix))
        .cloned()
        .collect()
}

#[must_use]
pub fn is_instruction(name: &str, prefix: &str) -> bool {
    name.len() > prefix.len() && name.starts_with(prefix)
}

/// Parse prefixed attributes into instructions. The prefix is stripped from
/// the instruction name; the source attribute is kept verbatim.
#[must_use]
pub fn parse(attributes: &[Attribute], prefix: &str) -> Vec<Instruction> {
    attributes
        .iter()
        .map(|attribute| {
            let bare = attribute.name.strip_prefix(prefix).unwrap_or(&attribute.name);
            let mut parts = bare.split('.');
            let main = parts.next().unwrap_or_default();
            let modifiers = parts.map(str::to_owned).collect();
            let (name, argument) = match main.split_once(':') {
                Some((name, argument)) => (name, Some(argument.to_owned())),
                None => (main, None),
            };
            Instruction {
                name: name.to_owned(),
                argument,
                modifiers,
                attribute: attribute.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_argument_and_modifiers() {
        let parsed = parse(&[Attribute::new("x-on:click.once.prevent", "a::b")], "x-");
        let i = &parsed[0];
        assert_eq!(i.name, "on");
        assert_eq!(i.argument.as_deref(), Some("click"));
        assert_eq!(i.modifiers, vec!["once", "prevent"]);
        assert_eq!(i.value(), Some("a::b"));
    }

    #[test]
    fn bare_instruction_has_no_argument() {
        let parsed = parse(&[Attribute::new("x-controller", "app")], "x-");
        assert_eq!(parsed[0].name, "controller");
        assert!(parsed[0].argument.is_none());
        assert!(parsed[0].modifiers.is_empty());
    }

    #[test]
    fn argument_keeps_later_colons() {
        let parsed = parse(&[Attribute::new("x-bind:xlink:href", "")], "x-");
        assert_eq!(parsed[0].argument.as_deref(), Some("xlink:href"));
    }

    #[test]
    fn filter_honours_prefix() {
        let attrs = [
            Attribute::new("class", "a"),
            Attribute::new("x-text", "c::v"),
            Attribute::new("x-", ""),
            Attribute::new("data-x-text", ""),
        ];
        let kept = filter(&attrs, "x-");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "x-text");
        assert_eq!(filter(&attrs, "data-").len(), 1);
    }
}
