//! Records, events, and event streams.
//!
//! A record is an unordered mapping from string keys to dynamic JSON values.
//! Every record travels with a `time` (Unix seconds) and is routed by a
//! dot-separated ASCII tag such as `app.access`; the tag lives alongside the
//! stream, not inside each event.

mod stream;

pub use stream::EventStream;

use serde::{Deserialize, Serialize};

/// An unordered record payload: string keys to dynamic values.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One timestamped record, as framed into chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unix seconds.
    pub time: i64,
    pub record: Record,
}

impl Event {
    #[must_use]
    pub fn new(time: i64, record: Record) -> Self {
        Event { time, record }
    }
}

/// Builds a [`Record`] from string key/value pairs. Handy in tests and in
/// filters that synthesize fields.
#[must_use]
pub fn record_from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Record {
    let mut record = Record::new();
    for (k, v) in pairs {
        record.insert(k.to_string(), serde_json::Value::String(v.to_string()));
    }
    record
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_to_json() {
        let event = Event::new(1_700_000_000, record_from_pairs([("message", "hello")]));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"time":1700000000,"record":{"message":"hello"}}"#
        );
    }

    #[test]
    fn record_from_pairs_builds_string_values() {
        let record = record_from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(record.len(), 2);
        assert_eq!(record["a"], serde_json::Value::String("1".into()));
    }
}
