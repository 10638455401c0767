use async_trait::async_trait;

use super::{AudioSink, SinkError, WriteOutcome};

/// Sink that discards everything. Requests keep their audio in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn accept(&self, data: &[u8]) -> WriteOutcome {
        Ok(data.len())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn is_discarding(&self) -> bool {
        true
    }
}
