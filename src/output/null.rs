//! Output that discards everything. For explicit drop rules and tests.

use async_trait::async_trait;

use crate::event::EventStream;
use crate::output::{EmitError, Output};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

#[async_trait]
impl Output for NullOutput {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn emit(&self, _tag: &str, _stream: EventStream) -> Result<(), EmitError> {
        Ok(())
    }
}
