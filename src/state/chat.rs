//! Streaming chat panel model.
//!
//! DESIGN
//! ======
//! The panel owns its message list. Sending appends the user's message and
//! an empty assistant placeholder, then streams the reply into that
//! placeholder by id. A failure flags the placeholder instead of removing
//! it, so any partial answer stays visible above the error.

#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::error_info::ErrorInfo;
use super::request::RequestController;
use crate::llm::types::{LlmError, Role};

/// A single chat bubble.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub content: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_streaming: bool,
    pub is_error: bool,
}

fn serialize_rfc3339<S: serde::Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    let text = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    s.serialize_str(&text)
}

/// Millisecond-timestamp ids, bumped to stay strictly increasing when two
/// messages land in the same millisecond.
#[derive(Clone, Debug, Default)]
pub struct MessageIds {
    last: u64,
}

impl MessageIds {
    pub fn next_at(&mut self, now: OffsetDateTime) -> u64 {
        let millis = u64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(0);
        self.last = millis.max(self.last + 1);
        self.last
    }
}

#[derive(Clone, Debug)]
pub struct ChatPanel {
    messages: Vec<ChatMessage>,
    ids: MessageIds,
    system_message: String,
}

impl ChatPanel {
    #[must_use]
    pub fn new(system_message: impl Into<String>) -> Self {
        Self { messages: Vec::new(), ids: MessageIds::default(), system_message: system_message.into() }
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn message(&self, id: u64) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Send `text` and stream the reply into a new assistant bubble.
    ///
    /// Returns `Ok(None)` without touching anything when `text` is blank,
    /// otherwise the id of the assistant bubble.
    ///
    /// # Errors
    ///
    /// Returns the controller's error after flagging the assistant bubble.
    pub async fn send(&mut self, controller: &RequestController, text: &str) -> Result<Option<u64>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        self.push(Role::User, text.to_string(), false);
        let reply_id = self.push(Role::Assistant, String::new(), true);

        let Self { messages, system_message, .. } = self;
        let result = controller
            .get_streaming_response(
                text,
                |chunk| {
                    if let Some(bubble) = messages.iter_mut().find(|m| m.id == reply_id) {
                        bubble.content.push_str(chunk);
                    }
                },
                system_message.as_str(),
            )
            .await;

        let Some(bubble) = self.messages.iter_mut().find(|m| m.id == reply_id) else {
            return result.map(|_| Some(reply_id));
        };
        bubble.is_streaming = false;
        match result {
            Ok(_) => Ok(Some(reply_id)),
            Err(e) => {
                bubble.is_error = true;
                if bubble.content.is_empty() {
                    bubble.content = ErrorInfo::from(&e).error;
                }
                Err(e)
            }
        }
    }

    fn push(&mut self, role: Role, content: String, is_streaming: bool) -> u64 {
        let timestamp = OffsetDateTime::now_utc();
        let id = self.ids.next_at(timestamp);
        self.messages.push(ChatMessage { id, role, content, timestamp, is_streaming, is_error: false });
        id
    }
}
