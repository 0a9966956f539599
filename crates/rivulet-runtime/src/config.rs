#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! - `prefix`: marks an attribute as an instruction (`x-` by default, so
//!   `x-on:click` names the `on` worker).
//! - `reclaim`: free subtrees removed from an observed root once their
//!   unmount has been reconciled (on by default).
//!
//! With the `config-file` feature the configuration can be loaded from a
//! TOML or JSON document:
//!
//! ```toml
//! prefix = "data-r-"
//! reclaim = false
//! ```

use crate::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "x-";

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "config-file", serde(default, deny_unknown_fields))]
pub struct Config {
    pub prefix: String,
    /// Reclaim detached subtrees after each reconciled batch. Turn off when
    /// the host keeps removed nodes around without a parent to reinsert
    /// them later.
    pub reclaim: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            reclaim: true,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// A prefix must be non-empty and free of whitespace and of the
    /// `:` / `.` separators used inside instruction names.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::Config("prefix must not be empty".into()));
        }
        if let Some(bad) = self
            .prefix
            .chars()
            .find(|c| c.is_whitespace() || *c == ':' || *c == '.')
        {
            return Err(Error::Config(format!(
                "prefix {:?} contains forbidden character {bad:?}",
                self.prefix
            )));
        }
        Ok(())
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "config-file")]
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefix_is_valid() {
        assert_eq!(Config::default().prefix, "x-");
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_separators_and_whitespace() {
        for bad in ["", "x:", "x.", "x -"] {
            assert!(
                matches!(Config::with_prefix(bad).validate(), Err(Error::Config(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn loads_from_toml_and_json() {
        assert_eq!(
            Config::from_toml_str("prefix = \"data-\"").unwrap().prefix,
            "data-"
        );
        assert_eq!(
            Config::from_json_str(r#"{"prefix":"v-"}"#).unwrap().prefix,
            "v-"
        );
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
        assert!(!Config::from_toml_str("reclaim = false").unwrap().reclaim);
        assert!(Config::from_json_str(r#"{"prefix":"a b"}"#).is_err());
        assert!(Config::from_toml_str("other = 1").is_err());
    }
}
