//! LLM — client for the hosted OpenAI-compatible completion service.
//!
//! DESIGN
//! ======
//! Configured from environment variables. `LlmClient` binds a model and
//! sampling parameters to an `OpenAiClient` and exposes it through the
//! provider-neutral [`LlmChat`] trait, which is the only surface the
//! controller and tax services depend on.

pub mod config;
pub mod openai;
pub mod schemas;
pub mod sse;
pub mod types;

use config::{LlmConfig, Sampling};
pub use types::LlmChat;
use types::{ChatResponse, ChunkStream, LlmError, ModerationResult, OutputSchema};

// =============================================================================
// CLIENT
// =============================================================================

/// Concrete LLM client configured by [`LlmClient::from_env`].
pub struct LlmClient {
    inner: openai::OpenAiClient,
    model: String,
    moderation_model: String,
    sampling: Sampling,
}

impl LlmClient {
    /// Build an LLM client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env()?;
        Self::from_config(config)
    }

    /// Build an LLM client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let inner =
            openai::OpenAiClient::new(config.api_key, config.openai_mode, config.openai_base_url, config.timeouts)?;
        Ok(Self { inner, model: config.model, moderation_model: config.moderation_model, sampling: config.sampling })
    }

    /// Return the configured completion model name (e.g. `"gpt-4o-mini"`).
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatResponse, LlmError> {
        let response = self
            .inner
            .chat(&self.model, self.sampling, system, user, None)
            .await?;
        tracing::debug!(
            model = %response.model,
            stop_reason = %response.stop_reason,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "llm: chat response"
        );
        Ok(response)
    }

    async fn chat_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError> {
        self.inner
            .chat_stream(&self.model, self.sampling, system, user)
            .await
    }

    async fn chat_structured(
        &self,
        system: &str,
        user: &str,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value, LlmError> {
        let response = self
            .inner
            .chat(&self.model, self.sampling, system, user, Some(schema))
            .await?;
        tracing::debug!(
            schema = %schema.name,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "llm: structured response"
        );
        openai::parse_structured_output(&response, &schema.name)
    }

    async fn moderate(&self, text: &str) -> Result<ModerationResult, LlmError> {
        self.inner.moderate(&self.moderation_model, text).await
    }
}
