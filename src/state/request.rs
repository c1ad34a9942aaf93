//! Request/response state controller for AI-assisted panels.
//!
//! DESIGN
//! ======
//! One controller per panel owns a `{loading, error, response}` triple and
//! publishes snapshots through a `watch` channel so views re-render on
//! change. Every operation walks the same three steps: mark loading and
//! clear the previous error before awaiting anything, record exactly one
//! of response or classified error, then clear loading. Failures are both
//! recorded for the error panel and returned to the caller, which may need
//! to react on its own (e.g. flag one chat bubble).
//!
//! OVERLAPPING CALLS
//! =================
//! Latest call wins. Each dispatch takes a ticket from a generation counter
//! bumped under the channel's write lock; only the current ticket may write
//! results, streamed text, or clear `loading`. A superseded call still runs
//! to completion and returns its own result to its own caller.

#[cfg(test)]
#[path = "request_test.rs"]
mod request_test;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error_info::ErrorInfo;
use super::stream::StreamAggregator;
use crate::llm::LlmChat;
use crate::llm::types::{LlmError, ModerationResult};
use crate::services::tax::{self, AnalysisResult, RecommendationSet, RefundAssistance};

// =============================================================================
// STATE
// =============================================================================

/// Last successful result of any controller operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Response {
    Text(String),
    Analysis(AnalysisResult),
    Refund(RefundAssistance),
    Recommendations(RecommendationSet),
    Moderation(ModerationResult),
}

impl Response {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestState {
    pub loading: bool,
    pub error: Option<ErrorInfo>,
    pub response: Option<Response>,
}

impl RequestState {
    fn append_text(&mut self, chunk: &str) {
        match &mut self.response {
            Some(Response::Text(text)) => text.push_str(chunk),
            other => *other = Some(Response::Text(chunk.to_string())),
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct RequestController {
    llm: Arc<dyn LlmChat>,
    state: watch::Sender<RequestState>,
    generation: AtomicU64,
}

impl RequestController {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmChat>) -> Self {
        let (state, _) = watch::channel(RequestState::default());
        Self { llm, state, generation: AtomicU64::new(0) }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    /// Single-shot chat completion.
    ///
    /// # Errors
    ///
    /// Returns the transport failure after recording its classification.
    pub async fn get_chat_response(&self, user_message: &str, system_message: &str) -> Result<String, LlmError> {
        let call = async { self.llm.chat(system_message, user_message).await.map(|r| r.text) };
        self.run("chat", false, call, |t| Response::Text(t.clone())).await
    }

    /// Streamed chat completion. `response` is reset to empty text, grows
    /// with every chunk, and holds the full concatenation on success. On a
    /// mid-stream failure the partial text stays in `response` next to the
    /// classified error.
    ///
    /// # Errors
    ///
    /// Returns the failure to start the stream or the first mid-stream error.
    pub async fn get_streaming_response<F>(
        &self,
        user_message: &str,
        mut on_chunk: F,
        system_message: &str,
    ) -> Result<String, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        const OP: &str = "stream";
        let ticket = self.begin(OP, true);
        let mut aggregator = StreamAggregator::new();
        let outcome = aggregator
            .stream(
                self.llm.as_ref(),
                user_message,
                |chunk| {
                    self.state.send_if_modified(|s| {
                        if self.generation.load(Ordering::Acquire) != ticket {
                            return false;
                        }
                        s.append_text(chunk);
                        true
                    });
                    on_chunk(chunk);
                },
                system_message,
            )
            .await;
        debug!(op = OP, ticket, chunk_count = aggregator.chunk_count(), "request: stream drained");
        let result = outcome.map(|()| aggregator.into_text());
        self.settle(ticket, OP, &result, |t| Response::Text(t.clone()));
        result
    }

    /// Structured compliance analysis of one document. Empty content is
    /// not rejected here.
    ///
    /// # Errors
    ///
    /// Returns transport or schema-decoding failures.
    pub async fn analyze_document(
        &self,
        document_content: &str,
        document_type: &str,
    ) -> Result<AnalysisResult, LlmError> {
        self.run(
            "analyze_document",
            false,
            tax::analyze_document(self.llm.as_ref(), document_content, document_type),
            |r| Response::Analysis(r.clone()),
        )
        .await
    }

    /// Refund-eligibility assistance for prepared request data.
    ///
    /// # Errors
    ///
    /// Returns transport or schema-decoding failures.
    pub async fn get_refund_assistance(&self, refund_data: &Value) -> Result<RefundAssistance, LlmError> {
        self.run(
            "refund_assistance",
            false,
            tax::refund_assistance(self.llm.as_ref(), refund_data),
            |r| Response::Refund(r.clone()),
        )
        .await
    }

    /// Recommendations keyed off an arbitrary profile object.
    ///
    /// # Errors
    ///
    /// Returns transport or schema-decoding failures.
    pub async fn get_personalized_recommendations(&self, user_profile: &Value) -> Result<RecommendationSet, LlmError> {
        self.run(
            "personalized_recommendations",
            false,
            tax::personalized_recommendations(self.llm.as_ref(), user_profile),
            |r| Response::Recommendations(r.clone()),
        )
        .await
    }

    /// Passthrough to the moderation endpoint.
    ///
    /// # Errors
    ///
    /// Returns the transport failure after recording its classification.
    pub async fn moderate_content(&self, text: &str) -> Result<ModerationResult, LlmError> {
        self.run("moderate", false, self.llm.moderate(text), |r| Response::Moderation(r.clone())).await
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    pub fn clear_response(&self) {
        self.state.send_if_modified(|s| s.response.take().is_some());
    }

    // -------------------------------------------------------------------------

    async fn run<T, Fut>(
        &self,
        op: &'static str,
        reset_response: bool,
        call: Fut,
        into_response: impl FnOnce(&T) -> Response,
    ) -> Result<T, LlmError>
    where
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let ticket = self.begin(op, reset_response);
        let result = call.await;
        self.settle(ticket, op, &result, into_response);
        result
    }

    /// Step 1: take a ticket, set `loading`, clear the previous error.
    fn begin(&self, op: &'static str, reset_response: bool) -> u64 {
        let mut ticket = 0;
        self.state.send_modify(|s| {
            ticket = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            s.loading = true;
            s.error = None;
            if reset_response {
                s.response = Some(Response::Text(String::new()));
            }
        });
        debug!(op, ticket, "request: dispatched");
        ticket
    }

    /// Steps 2 and 3, applied only if `ticket` is still the newest call.
    fn settle<T>(
        &self,
        ticket: u64,
        op: &'static str,
        result: &Result<T, LlmError>,
        into_response: impl FnOnce(&T) -> Response,
    ) {
        let update = match result {
            Ok(value) => Ok(into_response(value)),
            Err(e) => Err(ErrorInfo::from(e)),
        };
        let applied = self.state.send_if_modified(|s| {
            if self.generation.load(Ordering::Acquire) != ticket {
                return false;
            }
            match update {
                Ok(response) => s.response = Some(response),
                Err(info) => s.error = Some(info),
            }
            s.loading = false;
            true
        });

        match (result, applied) {
            (_, false) => debug!(op, ticket, "request: superseded by a newer call, state untouched"),
            (Ok(_), true) => info!(op, ticket, "request: completed"),
            (Err(e), true) => warn!(op, ticket, status = ?e.status(), error = %e, "request: failed"),
        }
    }
}
