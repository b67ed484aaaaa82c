//! The parsed configuration tree consumed by the core.
//!
//! Configuration arrives as a tree of elements of the shape
//! `<name arg> key value ... <child>...</child> </name>`, produced by an
//! external parser or assembled programmatically by an embedder. The core
//! only depends on the [`Element`] accessors defined here.
//!
//! Top-level directives understood by the agent:
//!
//! ```text
//! <filter PATTERN>           # stream filter, applied in document order
//!   @type grep
//!   ...
//! </filter>
//! <match PATTERN>            # output rule, first match wins
//!   @type file
//!   path /var/log/relay
//!   <buffer>
//!     @type file
//!     path /var/spool/relay
//!     buffer_chunk_limit 8m
//!     buffer_queue_limit 256
//!   </buffer>
//! </match>
//! <label @NAME>              # named routing scope
//!   <match ...> ... </match>
//! </label>
//! ```

pub mod units;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub use units::{parse_duration, ByteSize};

/// Errors raised while assembling the pipeline from a configuration tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required parameter `{key}` in <{element}>")]
    MissingParameter { element: String, key: String },

    #[error("invalid value `{value}` for `{key}` in <{element}>: {reason}")]
    InvalidParameter {
        element: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown {kind} plugin `{name}`")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("unknown directive <{0}>")]
    UnknownDirective(String),

    #[error("invalid match pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("label `{0}` is not defined")]
    UnknownLabel(String),

    #[error("label routing cycle detected through `{0}`")]
    LabelCycle(String),

    #[error("label name `{0}` must begin with `@`")]
    InvalidLabelName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One node of the configuration tree.
///
/// `name` is the directive (`match`, `filter`, `buffer`, ...), `arg` the
/// text after it (a tag pattern or label name), `attributes` the `key value`
/// lines, and `children` the nested elements in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    arg: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
}

impl Element {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Element::default()
        }
    }

    /// Builder: sets the element argument (`<match PATTERN>`).
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = arg.into();
        self
    }

    /// Builder: sets one attribute.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder: appends one child element.
    #[must_use]
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arg(&self) -> &str {
        &self.arg
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All attributes in sorted key order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    #[must_use]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    #[must_use]
    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns the attribute value or a [`ConfigError::MissingParameter`].
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingParameter {
            element: self.name.clone(),
            key: key.to_string(),
        })
    }

    /// Parses an optional attribute with [`FromStr`].
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| {
                ConfigError::InvalidParameter {
                    element: self.name.clone(),
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Parses an optional attribute with [`FromStr`], falling back to a
    /// default when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Parses an optional duration attribute (`30s`, `250ms`, `1.5`).
    pub fn parse_duration_or(
        &self,
        key: &str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_duration(raw).map_err(|reason| ConfigError::InvalidParameter {
                element: self.name.clone(),
                key: key.to_string(),
                value: raw.to_string(),
                reason,
            }),
        }
    }

    /// Parses an optional boolean attribute (`true`/`false`).
    pub fn parse_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.parse_or(key, default)
    }
}
