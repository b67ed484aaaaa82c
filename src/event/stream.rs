//! Event streams: finite sequences of timestamped records.

use crate::event::{Event, Record};

/// A finite, single-pass sequence of events attached to one tag.
///
/// The single-record form avoids a heap allocation on the hot emit path;
/// the array form backs multi-record batches. Array-backed streams happen to
/// be re-iterable (and cheap to clone for fan-out), but consumers must not
/// rely on re-iterability in general.
#[derive(Clone, Debug, PartialEq)]
pub enum EventStream {
    One(Event),
    Many(Vec<Event>),
}

impl EventStream {
    #[must_use]
    pub fn one(time: i64, record: Record) -> Self {
        EventStream::One(Event::new(time, record))
    }

    #[must_use]
    pub fn empty() -> Self {
        EventStream::Many(Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EventStream::One(_) => 1,
            EventStream::Many(events) => events.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            EventStream::One(_) => false,
            EventStream::Many(events) => events.is_empty(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        match self {
            EventStream::One(event) => std::slice::from_ref(event).iter(),
            EventStream::Many(events) => events.iter(),
        }
    }

    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        match self {
            EventStream::One(event) => vec![event],
            EventStream::Many(events) => events,
        }
    }
}

impl From<Vec<Event>> for EventStream {
    fn from(events: Vec<Event>) -> Self {
        EventStream::Many(events)
    }
}

impl From<Event> for EventStream {
    fn from(event: Event) -> Self {
        EventStream::One(event)
    }
}

impl FromIterator<Event> for EventStream {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        EventStream::Many(iter.into_iter().collect())
    }
}

impl IntoIterator for EventStream {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_events().into_iter()
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
