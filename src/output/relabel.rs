//! The `relabel` output: re-dispatches the stream, with its original tag,
//! through a named label's router.
//!
//! Targets are wired once at configuration time, after every label has been
//! built; unknown labels and label cycles are rejected there, so at runtime
//! forwarding is a plain router call.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::event::EventStream;
use crate::output::{EmitError, Output};
use crate::router::EventRouter;

pub struct RelabelOutput {
    label: String,
    target: OnceLock<Arc<EventRouter>>,
}

impl RelabelOutput {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        RelabelOutput {
            label: label.into(),
            target: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binds the target router. Later calls are ignored.
    pub fn wire(&self, router: Arc<EventRouter>) {
        let _ = self.target.set(router);
    }
}

#[async_trait]
impl Output for RelabelOutput {
    fn kind(&self) -> &'static str {
        "relabel"
    }

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        match self.target.get() {
            Some(router) => router.emit_stream(tag, stream),
            None => Err(EmitError::UnwiredLabel(self.label.clone())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::record_from_pairs;

    #[test]
    fn unwired_relabel_reports_its_label() {
        let relabel = RelabelOutput::new("@ERR");
        let err = relabel
            .emit("x", EventStream::one(1, record_from_pairs([("a", "b")])))
            .unwrap_err();
        assert!(matches!(err, EmitError::UnwiredLabel(l) if l == "@ERR"));
    }
}
