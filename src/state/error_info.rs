//! Display-ready classification of completion-service failures.

#[cfg(test)]
#[path = "error_info_test.rs"]
mod error_info_test;

use serde::{Deserialize, Serialize};

use crate::llm::types::LlmError;

/// Human-readable summary plus a remediation hint, rendered in the
/// dismissible error panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error: String,
    pub suggestion: String,
}

/// Map an optional HTTP-like status to its display pair. First match wins.
#[must_use]
pub fn classify(status: Option<u16>) -> ErrorInfo {
    let (error, suggestion) = match status {
        Some(401) => ("API key is invalid or missing", "Please check your API key configuration"),
        Some(429) => ("API rate limit exceeded", "Please try again in a few minutes"),
        Some(500) => ("OpenAI service is temporarily unavailable", "Please try again later"),
        _ => ("An unexpected error occurred", "Please try again or contact support"),
    };
    ErrorInfo { error: error.to_string(), suggestion: suggestion.to_string() }
}

impl From<&LlmError> for ErrorInfo {
    fn from(err: &LlmError) -> Self {
        classify(err.status())
    }
}
