//! Tax assistant service — prompts and typed structured-output records.
//!
//! DESIGN
//! ======
//! Each structured call pairs a fixed system prompt with one schema from
//! `llm::schemas` and deserializes the provider's JSON into the matching
//! record. No input validation happens here: callers decide what to send.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::llm::LlmChat;
use crate::llm::schemas;
use crate::llm::types::LlmError;

/// Default persona for free-form tax chat.
pub const TAX_ASSISTANT_SYSTEM: &str = "You are a Mexican tax assistant helping individual taxpayers \
request refunds (devoluciones) from the SAT. Answer in the user's language, cite the relevant \
rule (LISR, CFF, RMF) when you can, keep answers short and practical, and say so when a question \
needs a certified accountant.";

const ANALYSIS_SYSTEM: &str = "You review Mexican tax documents for SAT compliance. Identify \
missing or inconsistent data (RFC, régimen fiscal, uso de CFDI, amounts, dates), list concrete \
recommendations, and estimate your confidence between 0 and 1.";

const REFUND_SYSTEM: &str = "You assess whether a Mexican taxpayer's annual-return refund \
request is likely to be approved by the SAT. Estimate the refundable amount in MXN, list the \
supporting documents required, the next steps in order, and anything likely to trigger a \
requirement or rejection.";

const RECOMMENDATIONS_SYSTEM: &str = "You give personalized tax planning advice to Mexican \
individual taxpayers. Use only facts present in the profile; when a field is missing, do not \
invent it. Deadlines use ISO dates. Estimated savings are in MXN.";

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    NeedsReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub action: String,
    pub priority: Priority,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// Outcome of one document analysis call. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub compliance_status: ComplianceStatus,
    pub issues_found: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub required_actions: Vec<RequiredAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotEligible,
    NeedsReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundAssistance {
    pub eligibility: Eligibility,
    pub estimated_refund: f64,
    pub required_documents: Vec<String>,
    pub next_steps: Vec<String>,
    pub potential_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineNotice {
    pub deadline: String,
    pub description: String,
    pub priority: Priority,
}

/// Profile-driven recommendations. Fields the model leaves out come back
/// empty rather than failing the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    #[serde(default)]
    pub tax_optimization: Vec<String>,
    #[serde(default)]
    pub refund_opportunities: Vec<String>,
    #[serde(default)]
    pub compliance_improvements: Vec<String>,
    #[serde(default)]
    pub deadlines_to_watch: Vec<DeadlineNotice>,
    #[serde(default)]
    pub estimated_savings: f64,
}

// =============================================================================
// PROMPTS
// =============================================================================

pub(crate) fn analysis_prompt(document_content: &str, document_type: &str) -> String {
    format!("Document type: {document_type}\n\n<document>\n{document_content}\n</document>")
}

pub(crate) fn refund_prompt(refund_data: &Value) -> String {
    format!("Refund request data (JSON):\n{}", pretty(refund_data))
}

pub(crate) fn recommendations_prompt(user_profile: &Value) -> String {
    format!("Taxpayer profile (JSON):\n{}", pretty(user_profile))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, schema_name: &str) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::ApiParse(format!("{schema_name}: {e}")))
}

// =============================================================================
// CALLS
// =============================================================================

/// Analyze one document against SAT compliance rules.
///
/// # Errors
///
/// Propagates transport failures and rejects output that does not match
/// the `tax_document_analysis` schema.
pub async fn analyze_document(
    llm: &dyn LlmChat,
    document_content: &str,
    document_type: &str,
) -> Result<AnalysisResult, LlmError> {
    info!(document_type, content_len = document_content.len(), "tax: analyze document");
    let schema = schemas::tax_document_analysis();
    let value = llm
        .chat_structured(ANALYSIS_SYSTEM, &analysis_prompt(document_content, document_type), &schema)
        .await?;
    let mut result: AnalysisResult = decode(value, &schema.name)?;
    result.confidence = result.confidence.clamp(0.0, 1.0);
    Ok(result)
}

/// Assess refund eligibility for prepared request data.
///
/// # Errors
///
/// Propagates transport failures and rejects output that does not match
/// the `refund_assistance` schema.
pub async fn refund_assistance(llm: &dyn LlmChat, refund_data: &Value) -> Result<RefundAssistance, LlmError> {
    info!("tax: refund assistance");
    let schema = schemas::refund_assistance();
    let value = llm
        .chat_structured(REFUND_SYSTEM, &refund_prompt(refund_data), &schema)
        .await?;
    decode(value, &schema.name)
}

/// Recommendations for an arbitrary profile object. The profile's shape is
/// not validated.
///
/// # Errors
///
/// Propagates transport failures and rejects output that does not match
/// the `personalized_recommendations` schema.
pub async fn personalized_recommendations(
    llm: &dyn LlmChat,
    user_profile: &Value,
) -> Result<RecommendationSet, LlmError> {
    info!("tax: personalized recommendations");
    let schema = schemas::personalized_recommendations();
    let value = llm
        .chat_structured(RECOMMENDATIONS_SYSTEM, &recommendations_prompt(user_profile), &schema)
        .await?;
    decode(value, &schema.name)
}

#[cfg(test)]
#[path = "tax_test.rs"]
mod tests;
