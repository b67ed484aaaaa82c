//! The `record_transform` filter: add static fields to every record and
//! strip unwanted keys.
//!
//! ```text
//! <filter **>
//!   @type record_transform
//!   remove_keys password,internal_id
//!   <record>
//!     hostname web-1
//!     env prod
//!   </record>
//! </filter>
//! ```

use serde_json::Value;

use crate::config::{ConfigError, Element};
use crate::event::EventStream;
use crate::filter::Filter;

pub struct RecordTransformFilter {
    adds: Vec<(String, Value)>,
    removes: Vec<String>,
}

impl RecordTransformFilter {
    pub fn from_element(el: &Element) -> Result<Self, ConfigError> {
        let mut adds = Vec::new();
        for record_el in el.children_named("record") {
            for (key, value) in record_el.attributes() {
                adds.push((key.to_string(), Value::String(value.to_string())));
            }
        }
        let removes = el
            .get("remove_keys")
            .map(|keys| {
                keys.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(RecordTransformFilter { adds, removes })
    }
}

impl Filter for RecordTransformFilter {
    fn kind(&self) -> &'static str {
        "record_transform"
    }

    fn filter_stream(&self, _tag: &str, stream: EventStream) -> EventStream {
        stream
            .into_iter()
            .map(|mut event| {
                for (key, value) in &self.adds {
                    event.record.insert(key.clone(), value.clone());
                }
                for key in &self.removes {
                    event.record.remove(key);
                }
                event
            })
            .collect()
    }
}
