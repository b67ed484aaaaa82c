//! The `grep` filter: keep or drop events by matching record fields
//! against regular expressions.
//!
//! ```text
//! <filter app.**>
//!   @type grep
//!   <regexp>
//!     key message
//!     pattern /5\d\d/
//!   </regexp>
//!   <exclude>
//!     key level
//!     pattern /debug/
//!   </exclude>
//! </filter>
//! ```
//!
//! An event passes when every `<regexp>` rule matches and no `<exclude>`
//! rule does. A missing key fails a `<regexp>` rule and passes an
//! `<exclude>` rule.

use regex::Regex;
use serde_json::Value;

use crate::config::{ConfigError, Element};
use crate::event::EventStream;
use crate::filter::Filter;

struct FieldRule {
    key: String,
    pattern: Regex,
}

impl FieldRule {
    fn from_element(el: &Element) -> Result<Self, ConfigError> {
        let key = el.require("key")?.to_string();
        let raw = el.require("pattern")?;
        // patterns may be written /like this/
        let source = raw
            .strip_prefix('/')
            .and_then(|s| s.strip_suffix('/'))
            .unwrap_or(raw);
        let pattern = Regex::new(source).map_err(|e| ConfigError::InvalidParameter {
            element: el.name().to_string(),
            key: "pattern".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(FieldRule { key, pattern })
    }

    fn matches(&self, record: &crate::event::Record) -> bool {
        match record.get(&self.key) {
            None => false,
            Some(Value::String(s)) => self.pattern.is_match(s),
            Some(other) => self.pattern.is_match(&other.to_string()),
        }
    }
}

pub struct GrepFilter {
    includes: Vec<FieldRule>,
    excludes: Vec<FieldRule>,
}

impl GrepFilter {
    pub fn from_element(el: &Element) -> Result<Self, ConfigError> {
        let includes = el
            .children_named("regexp")
            .map(FieldRule::from_element)
            .collect::<Result<Vec<_>, _>>()?;
        let excludes = el
            .children_named("exclude")
            .map(FieldRule::from_element)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GrepFilter { includes, excludes })
    }

    fn keeps(&self, record: &crate::event::Record) -> bool {
        self.includes.iter().all(|r| r.matches(record))
            && !self.excludes.iter().any(|r| r.matches(record))
    }
}

impl Filter for GrepFilter {
    fn kind(&self) -> &'static str {
        "grep"
    }

    fn filter_stream(&self, _tag: &str, stream: EventStream) -> EventStream {
        stream.into_iter().filter(|e| self.keeps(&e.record)).collect()
    }
}
