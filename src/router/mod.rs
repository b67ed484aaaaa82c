//! Tag matching and dispatch.
//!
//! The router holds the ordered match rules and filter rules of one routing
//! scope. For each emitted tag it resolves a route — the filters whose
//! patterns match, plus the first matching rule's output — applies the
//! filters left-to-right, and hands the surviving stream to the output.
//!
//! Rule evaluation is strictly first-match-wins in configuration order;
//! later rules are never consulted, even for identical patterns. Resolved
//! routes are cached per tag in a small LRU, so steady-state dispatch costs
//! one cache hit; configuration reload builds a new router (and with it a
//! fresh cache).
//!
//! Events whose tag matches nothing are counted and dropped, with a
//! rate-limited warning so a misconfigured input cannot flood the log.

pub mod glob;

pub use glob::{GlobMatcher, MatchPattern};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::warn;

use crate::buffer::lock;
use crate::event::{EventStream, Record};
use crate::filter::Filter;
use crate::output::{EmitError, Output};

const ROUTE_CACHE_CAPACITY: usize = 1024;
const NO_MATCH_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// A tag pattern bound to its terminal output.
pub struct MatchRule {
    pub pattern: MatchPattern,
    pub output: Arc<dyn Output>,
}

/// A tag pattern bound to a stream filter.
pub struct FilterRule {
    pub pattern: MatchPattern,
    pub filter: Arc<dyn Filter>,
}

/// The resolved pipeline for one tag.
struct Route {
    filters: Vec<Arc<dyn Filter>>,
    output: Option<Arc<dyn Output>>,
}

/// Rate limiter for repeated warnings.
struct WarnThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl WarnThrottle {
    fn new(interval: Duration) -> Self {
        WarnThrottle {
            interval,
            last: Mutex::new(None),
        }
    }

    fn allow(&self) -> bool {
        let mut last = lock(&self.last);
        match *last {
            Some(at) if at.elapsed() < self.interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

/// One routing scope's dispatch table. Stateless with respect to events;
/// safe to share and re-enter from any task.
pub struct EventRouter {
    rules: Vec<MatchRule>,
    filters: Vec<FilterRule>,
    cache: Mutex<LruCache<String, Arc<Route>>>,
    unmatched: AtomicU64,
    unmatched_warn: WarnThrottle,
}

impl EventRouter {
    #[must_use]
    pub fn new(rules: Vec<MatchRule>, filters: Vec<FilterRule>) -> Self {
        let capacity =
            NonZeroUsize::new(ROUTE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        EventRouter {
            rules,
            filters,
            cache: Mutex::new(LruCache::new(capacity)),
            unmatched: AtomicU64::new(0),
            unmatched_warn: WarnThrottle::new(NO_MATCH_WARN_INTERVAL),
        }
    }

    /// Routes a single record.
    pub fn emit(&self, tag: &str, time: i64, record: Record) -> Result<(), EmitError> {
        self.emit_stream(tag, EventStream::one(time, record))
    }

    /// Routes a whole stream: resolve the route for `tag`, run the filter
    /// chain, deliver to the matched output. An unmatched tag is counted
    /// and dropped; a stream emptied by filters ends delivery quietly.
    pub fn emit_stream(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        let route = self.route(tag);
        let Some(output) = &route.output else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            if self.unmatched_warn.allow() {
                warn!(tag, "no match rule for tag; events dropped");
            }
            return Ok(());
        };

        let mut stream = stream;
        for filter in &route.filters {
            stream = filter.filter_stream(tag, stream);
            if stream.is_empty() {
                return Ok(());
            }
        }
        output.emit(tag, stream)
    }

    /// Count of emits whose tag matched no rule.
    #[must_use]
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    fn route(&self, tag: &str) -> Arc<Route> {
        if let Some(route) = lock(&self.cache).get(tag) {
            return Arc::clone(route);
        }
        let filters = self
            .filters
            .iter()
            .filter(|rule| rule.pattern.matches(tag))
            .map(|rule| Arc::clone(&rule.filter))
            .collect();
        let output = self
            .rules
            .iter()
            .find(|rule| rule.pattern.matches(tag))
            .map(|rule| Arc::clone(&rule.output));
        let route = Arc::new(Route { filters, output });
        lock(&self.cache).put(tag.to_string(), Arc::clone(&route));
        route
    }
}
