//! OpenAI-compatible API client.
//!
//! Supports both `/chat/completions` and `/responses` endpoints, each in
//! single-shot, streaming (SSE) and strict JSON-schema modes, plus the
//! `/moderations` endpoint.

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::config::{LlmTimeouts, OpenAiApiMode, Sampling};
use super::sse::{SseDecoder, SseEvent};
use super::types::{ChatResponse, ChunkStream, LlmError, Message, ModerationResult, OutputSchema};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    mode: OpenAiApiMode,
    request_timeout: Duration,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns [`LlmError::HttpClientBuild`] if the reqwest client cannot be built.
    pub fn new(
        api_key: String,
        mode: OpenAiApiMode,
        base_url: String,
        timeouts: LlmTimeouts,
    ) -> Result<Self, LlmError> {
        let request_timeout = Duration::from_secs(timeouts.request_secs);
        // Streams are bounded per read; single-shot calls get a total deadline in `send`.
        let http = reqwest::Client::builder()
            .read_timeout(request_timeout)
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, base_url, mode, request_timeout })
    }

    /// Deadline for the whole exchange, body included. `None` for streams,
    /// which may legitimately outlive it.
    pub(crate) fn total_timeout(&self, stream: bool) -> Option<Duration> {
        (!stream).then_some(self.request_timeout)
    }

    pub async fn chat(
        &self,
        model: &str,
        sampling: Sampling,
        system: &str,
        user: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<ChatResponse, LlmError> {
        let messages = build_messages(system, user);
        match self.mode {
            OpenAiApiMode::ChatCompletions => {
                let body = CcRequest::new(model, sampling, &messages, schema, false);
                let text = self.send_json("/chat/completions", &body).await?;
                parse_chat_completions_response(&text)
            }
            OpenAiApiMode::Responses => {
                let body = RespRequest::new(model, sampling, system, user, schema, false);
                let text = self.send_json("/responses", &body).await?;
                parse_responses_response(&text)
            }
        }
    }

    pub async fn chat_stream(
        &self,
        model: &str,
        sampling: Sampling,
        system: &str,
        user: &str,
    ) -> Result<ChunkStream, LlmError> {
        let messages = build_messages(system, user);
        let response = match self.mode {
            OpenAiApiMode::ChatCompletions => {
                let body = CcRequest::new(model, sampling, &messages, None, true);
                self.send("/chat/completions", &body, true).await?
            }
            OpenAiApiMode::Responses => {
                let body = RespRequest::new(model, sampling, system, user, None, true);
                self.send("/responses", &body, true).await?
            }
        };
        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| LlmError::ApiRequest(e.to_string())))
            .boxed();
        Ok(delta_stream(bytes, self.mode))
    }

    pub async fn moderate(&self, model: &str, input: &str) -> Result<ModerationResult, LlmError> {
        let body = ModerationRequest { model, input };
        let text = self.send_json("/moderations", &body).await?;
        parse_moderation_response(&text)
    }

    async fn send(&self, path: &str, body: &impl Serialize, stream: bool) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(url).bearer_auth(&self.api_key).json(body);
        if let Some(timeout) = self.total_timeout(stream) {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiResponse { status, body });
        }
        Ok(response)
    }

    async fn send_json(&self, path: &str, body: &impl Serialize) -> Result<String, LlmError> {
        self.send(path, body, false)
            .await?
            .text()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))
    }
}

fn build_messages(system: &str, user: &str) -> Vec<Message> {
    let mut out = Vec::with_capacity(2);
    if !system.trim().is_empty() {
        out.push(Message::system(system));
    }
    out.push(Message::user(user));
    out
}

// =============================================================================
// CHAT COMPLETIONS — wire types
// =============================================================================

#[derive(Serialize)]
pub(crate) struct CcRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<CcResponseFormat<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct CcResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaBody<'a>,
}

#[derive(Serialize)]
struct JsonSchemaBody<'a> {
    name: &'a str,
    description: &'a str,
    schema: &'a Value,
    strict: bool,
}

impl<'a> From<&'a OutputSchema> for JsonSchemaBody<'a> {
    fn from(schema: &'a OutputSchema) -> Self {
        Self { name: &schema.name, description: &schema.description, schema: &schema.schema, strict: true }
    }
}

impl<'a> CcRequest<'a> {
    pub(crate) fn new(
        model: &'a str,
        sampling: Sampling,
        messages: &'a [Message],
        schema: Option<&'a OutputSchema>,
        stream: bool,
    ) -> Self {
        Self {
            model,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            messages,
            response_format: schema
                .map(|s| CcResponseFormat { format_type: "json_schema", json_schema: JsonSchemaBody::from(s) }),
            stream,
        }
    }
}

// =============================================================================
// RESPONSES — wire types
// =============================================================================

#[derive(Serialize)]
pub(crate) struct RespRequest<'a> {
    model: &'a str,
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    instructions: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<RespTextConfig<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct RespTextConfig<'a> {
    format: RespFormat<'a>,
}

#[derive(Serialize)]
struct RespFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    #[serde(flatten)]
    body: JsonSchemaBody<'a>,
}

impl<'a> RespRequest<'a> {
    pub(crate) fn new(
        model: &'a str,
        sampling: Sampling,
        system: &'a str,
        user: &'a str,
        schema: Option<&'a OutputSchema>,
        stream: bool,
    ) -> Self {
        Self {
            model,
            max_output_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            instructions: system.trim(),
            input: user,
            text: schema.map(|s| RespTextConfig {
                format: RespFormat { format_type: "json_schema", body: JsonSchemaBody::from(s) },
            }),
            stream,
        }
    }
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    model: &'a str,
    input: &'a str,
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

pub(crate) fn parse_chat_completions_response(json_text: &str) -> Result<ChatResponse, LlmError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    let model = root
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default();
    let prompt_tokens = root
        .get("usage")
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let completion_tokens = root
        .get("usage")
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let Some(choice) = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
    else {
        return Err(LlmError::ApiParse("chat_completions: missing choices[0]".to_string()));
    };
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop");
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let refusal = message
        .get("refusal")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let stop_reason = if finish_reason == "length" { "max_tokens" } else { "end_turn" };

    Ok(ChatResponse {
        text,
        model,
        stop_reason: stop_reason.to_string(),
        refusal,
        input_tokens: prompt_tokens,
        output_tokens: completion_tokens,
    })
}

pub(crate) fn parse_responses_response(json_text: &str) -> Result<ChatResponse, LlmError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    let model = root
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default();
    let input_tokens = root
        .get("usage")
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = root
        .get("usage")
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut text = String::new();
    let mut refusal = None;
    if let Some(items) = root.get("output").and_then(Value::as_array) {
        for item in items {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            let Some(parts) = item.get("content").and_then(Value::as_array) else {
                continue;
            };
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("output_text" | "text") => {
                        if let Some(t) = part.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                    Some("refusal") => {
                        refusal = part
                            .get("refusal")
                            .and_then(Value::as_str)
                            .map(str::to_owned);
                    }
                    _ => {}
                }
            }
        }
    } else if let Some(output_text) = root.get("output_text").and_then(Value::as_str) {
        text.push_str(output_text);
    }

    let stop_reason = if root
        .get("incomplete_details")
        .and_then(|d| d.get("reason"))
        .and_then(Value::as_str)
        == Some("max_output_tokens")
    {
        "max_tokens"
    } else {
        "end_turn"
    };

    Ok(ChatResponse { text, model, stop_reason: stop_reason.to_string(), refusal, input_tokens, output_tokens })
}

/// Parse the text of a structured-output completion as JSON.
pub(crate) fn parse_structured_output(response: &ChatResponse, schema_name: &str) -> Result<Value, LlmError> {
    if let Some(refusal) = &response.refusal {
        return Err(LlmError::ApiParse(format!("{schema_name}: model refused: {refusal}")));
    }
    if response.stop_reason == "max_tokens" {
        return Err(LlmError::ApiParse(format!("{schema_name}: output truncated at max tokens")));
    }
    serde_json::from_str(&response.text).map_err(|e| LlmError::ApiParse(format!("{schema_name}: {e}")))
}

pub(crate) fn parse_moderation_response(json_text: &str) -> Result<ModerationResult, LlmError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    let Some(first) = root
        .get("results")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
    else {
        return Err(LlmError::ApiParse("moderations: missing results[0]".to_string()));
    };
    serde_json::from_value(first.clone()).map_err(|e| LlmError::ApiParse(format!("moderations: {e}")))
}

// =============================================================================
// STREAMING
// =============================================================================

/// What one SSE event means for the text stream.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Delta(String),
    Done,
    Error(LlmError),
    Skip,
}

pub(crate) fn parse_stream_event(event: &SseEvent, mode: OpenAiApiMode) -> StreamEvent {
    let data = event.data.trim();
    if data == "[DONE]" {
        return StreamEvent::Done;
    }
    let root: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return StreamEvent::Error(LlmError::ApiParse(format!("stream event: {e}"))),
    };
    if let Some(err) = root.get("error").filter(|e| !e.is_null()) {
        return StreamEvent::Error(stream_error(err));
    }
    match mode {
        OpenAiApiMode::ChatCompletions => root
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .map_or(StreamEvent::Skip, |t| StreamEvent::Delta(t.to_string())),
        OpenAiApiMode::Responses => {
            let kind = root
                .get("type")
                .and_then(Value::as_str)
                .or(event.event.as_deref());
            match kind {
                Some("response.output_text.delta") => root
                    .get("delta")
                    .and_then(Value::as_str)
                    .map_or(StreamEvent::Skip, |t| StreamEvent::Delta(t.to_string())),
                Some("response.completed") => StreamEvent::Done,
                Some("error") => StreamEvent::Error(stream_error(&root)),
                Some("response.failed") => {
                    let err = root
                        .get("response")
                        .and_then(|r| r.get("error"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    StreamEvent::Error(stream_error(&err))
                }
                _ => StreamEvent::Skip,
            }
        }
    }
}

fn stream_error(err: &Value) -> LlmError {
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown stream error")
        .to_string();
    let code = err.get("code");
    let status = code
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
        .and_then(|c| u16::try_from(c).ok())
        .or_else(|| code.and_then(Value::as_str).and_then(category_status))
        .or_else(|| err.get("type").and_then(Value::as_str).and_then(category_status));
    LlmError::Stream { status, message }
}

/// HTTP status implied by an OpenAI error category string.
fn category_status(category: &str) -> Option<u16> {
    match category {
        "server_error" => Some(500),
        "invalid_api_key" | "authentication_error" => Some(401),
        "insufficient_quota" => Some(429),
        c if c.starts_with("rate_limit") => Some(429),
        _ => None,
    }
}

struct DeltaState {
    bytes: BoxStream<'static, Result<Vec<u8>, LlmError>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    mode: OpenAiApiMode,
    done: bool,
}

impl DeltaState {
    /// Queue the meaning of each decoded event; stops at the first terminal one.
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            match parse_stream_event(&event, self.mode) {
                StreamEvent::Delta(text) => self.pending.push_back(Ok(text)),
                StreamEvent::Skip => {}
                StreamEvent::Done => {
                    self.done = true;
                    return;
                }
                StreamEvent::Error(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
    }
}

/// Turn a raw SSE byte stream into an ordered stream of text deltas.
///
/// The stream ends after the provider's terminal event or after the first
/// error item. A connection that closes before the terminal event yields a
/// final `LlmError::Stream` item.
pub(crate) fn delta_stream(
    bytes: BoxStream<'static, Result<Vec<u8>, LlmError>>,
    mode: OpenAiApiMode,
) -> ChunkStream {
    let state = DeltaState { bytes, decoder: SseDecoder::new(), pending: VecDeque::new(), mode, done: false };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    st.absorb(events);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    let tail = st.decoder.finish();
                    st.absorb(tail);
                    if !st.done {
                        debug!("llm: stream closed before a terminal event");
                        st.pending.push_back(Err(LlmError::Stream {
                            status: None,
                            message: "stream closed before completion".to_string(),
                        }));
                    }
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;
