//! Tracing setup and the runtime's log line formatter.
//!
//! Log lines are prefixed so they can be told apart from the host
//! application's own output when the runtime is embedded:
//!
//! ```text
//! tagrelay | LEVEL | [span{fields}:] message key=value
//! ```

use std::fmt::{self, Write as _};

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Log formatter prefixing every line with `tagrelay | LEVEL |` and the
/// active span scope.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    /// Renders the span scope, root first, as `name{fields}: ` pairs.
    fn span_prefix<S, N>(ctx: &FmtContext<'_, S, N>) -> Result<String, fmt::Error>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let mut prefix = String::new();
        let Some(scope) = ctx.event_scope() else {
            return Ok(prefix);
        };
        for span in scope.from_root() {
            let extensions = span.extensions();
            let rendered = extensions
                .get::<FormattedFields<N>>()
                .map(|f| f.fields.as_str())
                .unwrap_or_default();
            if rendered.is_empty() {
                write!(prefix, "{}: ", span.name())?;
            } else {
                write!(prefix, "{}{{{rendered}}}: ", span.name())?;
            }
        }
        Ok(prefix)
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut line: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        write!(line, "tagrelay | {level} | ")?;
        line.write_str(&Self::span_prefix(ctx)?)?;
        ctx.field_format().format_fields(line.by_ref(), event)?;
        line.write_char('\n')
    }
}

/// Installs a global subscriber using [`Formatter`] and the `RUST_LOG`
/// environment filter (default `info`). Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .event_format(Formatter)
        .with_env_filter(filter)
        .try_init();
}
