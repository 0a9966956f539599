#![forbid(unsafe_code)]

//! Instruction modifier parsing (`x-on:click.once.wait.250`).

use ahash::AHashMap;

use crate::error::{Error, Result};

/// Whether a modifier may carry a number in the following segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Flag,
    Numeric,
}

pub type Schema = &'static [(&'static str, Kind)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Set,
    Number(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    map: AHashMap<String, Modifier>,
}

impl Modifiers {
    /// Parse `modifiers` against `schema`.
    ///
    /// A numeric modifier consumes the next segment when it is a canonical
    /// integer (`"250"`, not `"0250"` or `"+1"`); otherwise it is recorded
    /// without a number and the next segment is parsed on its own.
    pub fn parse(modifiers: &[String], schema: Schema) -> Result<Self> {
        let mut map = AHashMap::new();
        let mut i = 0;
        while i < modifiers.len() {
            let name = &modifiers[i];
            let kind = schema
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, k)| *k)
                .ok_or_else(|| Error::syntax(format!("unrecognized modifier `{name}`")))?;
            let value = match (kind, modifiers.get(i + 1).and_then(|n| canonical_int(n))) {
                (Kind::Numeric, Some(n)) => {
                    i += 1;
                    Modifier::Number(n)
                }
                _ => Modifier::Set,
            };
            map.insert(name.clone(), value);
            i += 1;
        }
        Ok(Self { map })
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    #[must_use]
    pub fn number(&self, name: &str) -> Option<i64> {
        match self.map.get(name) {
            Some(Modifier::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn canonical_int(s: &str) -> Option<i64> {
    let n: i64 = s.parse().ok()?;
    (n.to_string() == s).then_some(n)
}

/// `foo-bar-baz` → `fooBarBaz`.
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: Schema = &[("once", Kind::Flag), ("debounce", Kind::Numeric)];

    fn mods(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn numeric_consumes_canonical_integer() {
        let m = Modifiers::parse(&mods(&["debounce", "250", "once"]), SCHEMA).unwrap();
        assert_eq!(m.number("debounce"), Some(250));
        assert!(m.has("once"));
    }

    #[test]
    fn non_canonical_number_is_not_consumed() {
        let err = Modifiers::parse(&mods(&["debounce", "0250"]), SCHEMA).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
        let m = Modifiers::parse(&mods(&["debounce", "once"]), SCHEMA).unwrap();
        assert!(m.has("debounce") && m.number("debounce").is_none() && m.has("once"));
    }

    #[test]
    fn unknown_modifier_is_a_syntax_error() {
        assert!(Modifiers::parse(&mods(&["later"]), SCHEMA).is_err());
        assert!(Modifiers::parse(&[], SCHEMA).unwrap().is_empty());
    }

    #[test]
    fn camel_cases_kebab_names() {
        assert_eq!(camel_case("view-box"), "viewBox");
        assert_eq!(camel_case("plain"), "plain");
        assert_eq!(camel_case("my-custom-event"), "myCustomEvent");
    }
}
