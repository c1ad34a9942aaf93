//! Scripted `LlmChat` mock shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::llm::LlmChat;
use crate::llm::types::{ChatResponse, ChunkStream, LlmError, ModerationResult, OutputSchema};

/// One scripted outcome, consumed by the next call in order.
pub enum Scripted {
    Text(String),
    Json(Value),
    Moderation(ModerationResult),
    Chunks(Vec<Result<String, LlmError>>),
    Fail(LlmError),
}

/// What the mock was asked.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: &'static str,
    pub system: String,
    pub user: String,
    pub schema: Option<String>,
}

#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<MockCall>>,
    gates: Mutex<VecDeque<Option<oneshot::Receiver<()>>>>,
}

impl MockLlm {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self { script: Mutex::new(script.into()), ..Self::default() }
    }

    pub fn text(text: &str) -> Self {
        Self::new(vec![Scripted::Text(text.into())])
    }

    pub fn failing(status: u16) -> Self {
        Self::new(vec![Scripted::Fail(LlmError::ApiResponse { status, body: String::new() })])
    }

    pub fn chunks(chunks: &[&str]) -> Self {
        Self::new(vec![Scripted::Chunks(chunks.iter().map(|c| Ok((*c).to_string())).collect())])
    }

    /// Make the next unscheduled call wait until the returned sender fires.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(Some(rx));
        tx
    }

    /// Let the next call through without waiting; keeps gate order aligned
    /// with call order when only a later call should be held.
    pub fn pass_next(&self) {
        self.gates.lock().unwrap().push_back(None);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn next(&self, method: &'static str, system: &str, user: &str, schema: Option<&str>) -> Scripted {
        self.calls.lock().unwrap().push(MockCall {
            method,
            system: system.to_string(),
            user: user.to_string(),
            schema: schema.map(str::to_owned),
        });
        let scripted = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockLlm: no scripted outcome left for {method}"));
        let gate = self.gates.lock().unwrap().pop_front().flatten();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        scripted
    }
}

#[async_trait::async_trait]
impl LlmChat for MockLlm {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatResponse, LlmError> {
        match self.next("chat", system, user, None).await {
            Scripted::Text(text) => Ok(ChatResponse {
                text,
                model: "mock".into(),
                stop_reason: "end_turn".into(),
                refusal: None,
                input_tokens: 0,
                output_tokens: 0,
            }),
            Scripted::Fail(e) => Err(e),
            _ => panic!("MockLlm: chat expected Text or Fail"),
        }
    }

    async fn chat_stream(&self, system: &str, user: &str) -> Result<ChunkStream, LlmError> {
        match self.next("chat_stream", system, user, None).await {
            Scripted::Chunks(items) => Ok(futures::stream::iter(items).boxed()),
            Scripted::Fail(e) => Err(e),
            _ => panic!("MockLlm: chat_stream expected Chunks or Fail"),
        }
    }

    async fn chat_structured(&self, system: &str, user: &str, schema: &OutputSchema) -> Result<Value, LlmError> {
        match self.next("chat_structured", system, user, Some(&schema.name)).await {
            Scripted::Json(value) => Ok(value),
            Scripted::Fail(e) => Err(e),
            _ => panic!("MockLlm: chat_structured expected Json or Fail"),
        }
    }

    async fn moderate(&self, text: &str) -> Result<ModerationResult, LlmError> {
        match self.next("moderate", "", text, None).await {
            Scripted::Moderation(result) => Ok(result),
            Scripted::Fail(e) => Err(e),
            _ => panic!("MockLlm: moderate expected Moderation or Fail"),
        }
    }
}

/// A well-formed `tax_document_analysis` payload.
pub fn analysis_json() -> Value {
    serde_json::json!({
        "compliance_status": "needs_review",
        "issues_found": ["RFC del receptor no coincide con la constancia"],
        "recommendations": ["Solicitar la reexpedición del CFDI"],
        "confidence": 0.82,
        "required_actions": [
            { "action": "Solicitar CFDI corregido", "priority": "high", "deadline": "2026-04-30" },
            { "action": "Conservar comprobante de pago", "priority": "low", "deadline": null }
        ]
    })
}

/// A well-formed `personalized_recommendations` payload.
pub fn recommendations_json() -> Value {
    serde_json::json!({
        "tax_optimization": ["Deducir colegiaturas"],
        "refund_opportunities": ["Intereses reales de crédito hipotecario"],
        "compliance_improvements": ["Actualizar régimen fiscal"],
        "deadlines_to_watch": [
            { "deadline": "2026-04-30", "description": "Declaración anual", "priority": "high" }
        ],
        "estimated_savings": 15000.0
    })
}

/// A well-formed `refund_assistance` payload.
pub fn refund_json() -> Value {
    serde_json::json!({
        "eligibility": "eligible",
        "estimated_refund": 8450.5,
        "required_documents": ["Estado de cuenta con CLABE", "e.firma vigente"],
        "next_steps": ["Presentar la declaración anual", "Dar seguimiento en el buzón tributario"],
        "potential_issues": []
    })
}
