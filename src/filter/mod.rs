//! Stream filters.
//!
//! A filter transforms the event stream for a tag before it reaches the
//! terminal output. Filters compose left-to-right in configuration order; a
//! filter that returns an empty stream terminates delivery for that batch.
//! Filters are pure with respect to the router: they never re-emit into it.

pub mod grep;
pub mod record_transform;

pub use grep::GrepFilter;
pub use record_transform::RecordTransformFilter;

use crate::event::EventStream;

pub trait Filter: Send + Sync {
    /// Plugin type name (`grep`, `record_transform`, ...).
    fn kind(&self) -> &'static str;

    /// Transforms one batch. Dropping every event ends delivery.
    fn filter_stream(&self, tag: &str, stream: EventStream) -> EventStream;
}

impl std::fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").field("kind", &self.kind()).finish()
    }
}
