//! The `copy` output: fans a re-iterable copy of the stream out to several
//! sub-outputs.
//!
//! Delivery to each sub-output is independent: one failing store does not
//! stop the others. Every failure is logged; the last one is surfaced to
//! the emitter afterwards, so backpressure from any store still reaches the
//! input.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::warn;

use crate::config::ConfigError;
use crate::event::EventStream;
use crate::output::{EmitError, Output};

pub struct MultiOutput {
    outputs: Vec<Arc<dyn Output>>,
}

impl MultiOutput {
    #[must_use]
    pub fn new(outputs: Vec<Arc<dyn Output>>) -> Self {
        MultiOutput { outputs }
    }

    #[must_use]
    pub fn outputs(&self) -> &[Arc<dyn Output>] {
        &self.outputs
    }
}

#[async_trait]
impl Output for MultiOutput {
    fn kind(&self) -> &'static str {
        "copy"
    }

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        let mut last_error = None;
        for output in &self.outputs {
            if let Err(e) = output.emit(tag, stream.clone()) {
                warn!(store = output.kind(), tag, error = %e, "copy store failed to accept events");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start(&self) -> Result<(), ConfigError> {
        for output in &self.outputs {
            output.start().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        join_all(self.outputs.iter().map(|o| o.shutdown())).await;
    }

    fn observe(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert(
            "type".to_string(),
            serde_json::Value::String(self.kind().to_string()),
        );
        map.insert(
            "stores".to_string(),
            serde_json::Value::Array(
                self.outputs
                    .iter()
                    .map(|o| serde_json::Value::Object(o.observe()))
                    .collect(),
            ),
        );
        map
    }
}
