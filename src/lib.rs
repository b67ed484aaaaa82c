//! # tagrelay
//!
//! A pluggable log-event forwarding runtime. Producers deliver tagged records
//! into an in-process router; the router dispatches each record to consumers
//! by matching its tag against a configured rule set; buffered outputs batch
//! records into size-bounded chunks, enqueue them, and flush asynchronously
//! with retry.
//!
//! ## Architecture
//!
//! ```text
//!  Input ──> RootAgent ──> EventRouter ──> (filter chain) ──> Output
//!                │              │                               │
//!                │              └─ first matching <match> rule  │
//!                └─ <label @X> scopes, re-entered via relabel   │
//!                                                               v
//!                                               Buffer (open chunks + queue)
//!                                                               │
//!                                               flusher task ── write / retry
//! ```
//!
//! The library is organized into the following modules:
//! - [`agent`]: configuration assembly, label scopes, lifecycle coordination
//! - [`router`]: tag glob matching and first-match-wins dispatch
//! - [`filter`]: stream filters applied ahead of the terminal output
//! - [`output`]: output plugins and the buffered flush/retry machinery
//! - [`buffer`]: chunk engine — open-chunk map, FIFO flush queue, backings
//! - [`event`]: records, events, and event streams
//! - [`config`]: the parsed configuration element tree consumed by the core
//! - [`registry`]: plugin constructor table populated at process init

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_assignments)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod agent;
pub mod buffer;
pub mod config;
pub mod event;
pub mod filter;
pub mod logger;
pub mod output;
pub mod registry;
pub mod router;

pub use agent::RootAgent;
pub use buffer::{Buffer, BufferConfig, BufferError, Chunk, ChunkBacking, ChunkId};
pub use config::{ByteSize, ConfigError, Element};
pub use event::{Event, EventStream, Record};
pub use filter::Filter;
pub use output::{ChunkWriter, EmitError, Output, WriteError};
pub use registry::Registry;
pub use router::{EventRouter, MatchPattern, MatchRule};

/// Crate version reported by the monitoring surface.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
