//! The plugin registry: a table of constructor closures populated at
//! process init and consulted while the configuration tree is assembled.
//!
//! Plugins are looked up by kind (`output`, `filter`, `buffer`) and type
//! name (the `@type` attribute). Embedders register their own plugins next
//! to the built-ins; there is no runtime reflection or code loading.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::file::FileBacking;
use crate::buffer::memory::MemoryBacking;
use crate::buffer::{Buffer, BufferConfig, BufferError, ChunkBacking};
use crate::config::{ConfigError, Element};
use crate::filter::{Filter, GrepFilter, RecordTransformFilter};
use crate::output::file::FileSink;
use crate::output::stdout::StdoutSink;
use crate::output::{
    BufferedOutput, FlushConfig, MultiOutput, NullOutput, Output, RelabelOutput, StdoutOutput,
};

/// State threaded through output construction: the registry for nested
/// lookups (`copy` stores) and the relabel references the agent must wire
/// once every label exists.
pub struct OutputBuildCtx<'a> {
    pub registry: &'a Registry,
    pub relabels: &'a mut Vec<Arc<RelabelOutput>>,
}

pub type OutputCtor = Box<
    dyn Fn(&Element, &mut OutputBuildCtx<'_>) -> Result<Arc<dyn Output>, ConfigError>
        + Send
        + Sync,
>;
pub type FilterCtor =
    Box<dyn Fn(&Element) -> Result<Arc<dyn Filter>, ConfigError> + Send + Sync>;
pub type BufferCtor =
    Box<dyn Fn(&Element) -> Result<Box<dyn ChunkBacking>, ConfigError> + Send + Sync>;

fn backing_error(e: BufferError) -> ConfigError {
    match e {
        BufferError::Io(io) => ConfigError::Io(io),
        other => ConfigError::Io(std::io::Error::other(other.to_string())),
    }
}

/// Constructor table for every plugin kind.
pub struct Registry {
    outputs: HashMap<String, OutputCtor>,
    filters: HashMap<String, FilterCtor>,
    buffers: HashMap<String, BufferCtor>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

impl Registry {
    /// An empty registry; mostly for tests that want full control.
    #[must_use]
    pub fn empty() -> Self {
        Registry {
            outputs: HashMap::new(),
            filters: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    /// The registry with every built-in plugin registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Registry::empty();

        registry.register_output(
            "stdout",
            Box::new(|el, ctx| {
                if el.first_child("buffer").is_some() {
                    let buffer = ctx.registry.build_buffer(el)?;
                    Ok(Arc::new(BufferedOutput::new(
                        "stdout",
                        buffer,
                        Arc::new(StdoutSink),
                        FlushConfig::from_element(el)?,
                    )))
                } else {
                    Ok(Arc::new(StdoutOutput))
                }
            }),
        );

        registry.register_output(
            "file",
            Box::new(|el, ctx| {
                let sink = FileSink::new(el.require("path")?).map_err(backing_error)?;
                let buffer = ctx.registry.build_buffer(el)?;
                Ok(Arc::new(BufferedOutput::new(
                    "file",
                    buffer,
                    Arc::new(sink),
                    FlushConfig::from_element(el)?,
                )))
            }),
        );

        registry.register_output("null", Box::new(|_el, _ctx| Ok(Arc::new(NullOutput))));

        registry.register_output(
            "copy",
            Box::new(|el, ctx| {
                let registry = ctx.registry;
                let stores = el
                    .children_named("store")
                    .map(|store| registry.build_output(store, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(MultiOutput::new(stores)))
            }),
        );

        registry.register_output(
            "relabel",
            Box::new(|el, ctx| {
                let relabel = Arc::new(RelabelOutput::new(el.require("@label")?));
                ctx.relabels.push(Arc::clone(&relabel));
                Ok(relabel)
            }),
        );

        registry.register_filter(
            "grep",
            Box::new(|el| Ok(Arc::new(GrepFilter::from_element(el)?))),
        );
        registry.register_filter(
            "record_transform",
            Box::new(|el| Ok(Arc::new(RecordTransformFilter::from_element(el)?))),
        );

        registry.register_buffer("memory", Box::new(|_el| Ok(Box::new(MemoryBacking))));
        registry.register_buffer(
            "file",
            Box::new(|el| {
                let backing =
                    FileBacking::new(el.require("path")?).map_err(backing_error)?;
                Ok(Box::new(backing))
            }),
        );

        registry
    }

    pub fn register_output(&mut self, name: impl Into<String>, ctor: OutputCtor) {
        self.outputs.insert(name.into(), ctor);
    }

    pub fn register_filter(&mut self, name: impl Into<String>, ctor: FilterCtor) {
        self.filters.insert(name.into(), ctor);
    }

    pub fn register_buffer(&mut self, name: impl Into<String>, ctor: BufferCtor) {
        self.buffers.insert(name.into(), ctor);
    }

    /// Builds the output described by a `<match>` (or `<store>`) element.
    pub fn build_output(
        &self,
        el: &Element,
        ctx: &mut OutputBuildCtx<'_>,
    ) -> Result<Arc<dyn Output>, ConfigError> {
        let name = el.require("@type")?;
        let ctor = self
            .outputs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlugin {
                kind: "output",
                name: name.to_string(),
            })?;
        ctor(el, ctx)
    }

    /// Builds the filter described by a `<filter>` element.
    pub fn build_filter(&self, el: &Element) -> Result<Arc<dyn Filter>, ConfigError> {
        let name = el.require("@type")?;
        let ctor = self
            .filters
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlugin {
                kind: "filter",
                name: name.to_string(),
            })?;
        ctor(el)
    }

    /// Builds a [`Buffer`] from the `<buffer>` child of an output element,
    /// or a default memory buffer when there is none.
    pub fn build_buffer(&self, parent: &Element) -> Result<Buffer, ConfigError> {
        match parent.first_child("buffer") {
            Some(el) => {
                let config = BufferConfig::from_element(el)?;
                let name = el.get_or("@type", "memory");
                let ctor = self
                    .buffers
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownPlugin {
                        kind: "buffer",
                        name: name.to_string(),
                    })?;
                Ok(Buffer::new(config, ctor(el)?))
            }
            None => Ok(Buffer::new(BufferConfig::default(), Box::new(MemoryBacking))),
        }
    }
}
