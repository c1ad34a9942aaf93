//! LLM types — provider-neutral messages, errors and the `LlmChat` seam.
//!
//! Everything above this module (controller, aggregator, tax services) talks
//! to the completion service only through [`LlmChat`], so tests can swap in a
//! scripted mock.

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by LLM client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// The required API key environment variable is not set.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    /// The HTTP request to the LLM provider failed (connect, timeout, body read).
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The LLM provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// The LLM provider response body could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The provider reported an error event in the middle of a stream.
    #[error("stream error: {message}")]
    Stream { status: Option<u16>, message: String },
}

impl LlmError {
    /// HTTP-like status code carried by this failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiResponse { status, .. } => Some(*status),
            Self::Stream { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a manual retry could plausibly succeed. Nothing in this crate
    /// retries automatically; the flag is surfaced for callers and logs.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_))
            || matches!(self.status(), Some(429 | 500..=599))
    }
}

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Response from a single-shot completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
    pub stop_reason: String,
    /// Set when the model declined to answer a structured-output request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// =============================================================================
// STRUCTURED OUTPUT
// =============================================================================

/// A named JSON schema the model output must conform to.
///
/// The `name` travels to the provider verbatim and is part of the wire
/// contract, as are the schema's field names and enum values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

// =============================================================================
// MODERATION
// =============================================================================

/// Verdict of the moderation endpoint for one input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
}

impl ModerationResult {
    /// Names of the categories the endpoint flagged, in sorted order.
    #[must_use]
    pub fn flagged_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|(_, hit)| **hit)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// =============================================================================
// LLM CHAT TRAIT
// =============================================================================

/// Ordered stream of text deltas from a streaming completion.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

/// Provider-neutral async trait for the completion service. Enables mocking in tests.
#[async_trait::async_trait]
pub trait LlmChat: Send + Sync {
    /// Single-shot completion for a system/user message pair.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request fails or the response is malformed.
    async fn chat(&self, system: &str, user: &str) -> Result<ChatResponse, LlmError>;

    /// Streaming completion. The returned stream yields text deltas in
    /// arrival order and ends after the provider's terminal event.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request cannot be started. Failures
    /// after the first byte surface as `Err` items inside the stream.
    async fn chat_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError>;

    /// Completion constrained to `schema`, returned as parsed JSON.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request fails, the model refuses, or the
    /// output is not valid JSON.
    async fn chat_structured(
        &self,
        system: &str,
        user: &str,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value, LlmError>;

    /// Classify `text` against the provider's content policy.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request fails or the response is malformed.
    async fn moderate(&self, text: &str) -> Result<ModerationResult, LlmError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
