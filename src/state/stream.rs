//! Streaming aggregator: folds ordered text chunks into a growing buffer.
//!
//! DESIGN
//! ======
//! Each non-empty chunk is appended to the buffer and handed to the
//! caller's observer before the next chunk is polled, so observers see
//! strict arrival order with no batching. A transport error stops
//! consumption; whatever was already aggregated stays readable because the
//! UI shows a partial answer followed by the error.

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::llm::LlmChat;
use crate::llm::types::LlmError;

#[derive(Debug, Default)]
pub struct StreamAggregator {
    buffer: String,
    chunks: usize,
}

impl StreamAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text aggregated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Number of non-empty chunks delivered so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.buffer
    }

    /// Append one chunk. Returns `false` for empty chunks, which are dropped.
    pub fn push(&mut self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.buffer.push_str(chunk);
        self.chunks += 1;
        true
    }

    /// Drain `stream`, calling `on_chunk` once per non-empty chunk in order.
    ///
    /// # Errors
    ///
    /// Returns the first error item; later items are not polled.
    pub async fn consume<S, F>(&mut self, mut stream: S, mut on_chunk: F) -> Result<(), LlmError>
    where
        S: Stream<Item = Result<String, LlmError>> + Unpin,
        F: FnMut(&str),
    {
        while let Some(item) = stream.next().await {
            let chunk = item?;
            if self.push(&chunk) {
                on_chunk(&chunk);
            }
        }
        debug!(chunk_count = self.chunks, len = self.buffer.len(), "stream: completed");
        Ok(())
    }

    /// Start a streaming completion and consume it.
    ///
    /// # Errors
    ///
    /// Returns the failure to start the stream, or the first mid-stream error.
    pub async fn stream<F>(
        &mut self,
        llm: &dyn LlmChat,
        user_message: &str,
        on_chunk: F,
        system_message: &str,
    ) -> Result<(), LlmError>
    where
        F: FnMut(&str),
    {
        let stream = llm.chat_stream(system_message, user_message).await?;
        self.consume(stream, on_chunk).await
    }
}
