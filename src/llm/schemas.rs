//! Structured-output schemas for the tax assistant.
//!
//! Schema names, field names and enum values are a wire contract with the
//! provider's structured-output feature; the typed records in
//! `services::tax` deserialize exactly these shapes. Strict mode requires
//! every property to be listed in `required`, so optional values are typed
//! as `["string", "null"]`.

use serde_json::{Value, json};

use super::types::OutputSchema;

pub const TAX_DOCUMENT_ANALYSIS: &str = "tax_document_analysis";
pub const REFUND_ASSISTANCE: &str = "refund_assistance";
pub const PERSONALIZED_RECOMMENDATIONS: &str = "personalized_recommendations";

fn string_array() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

fn priority() -> Value {
    json!({ "type": "string", "enum": ["high", "medium", "low"] })
}

/// Schema for a single-document compliance analysis.
#[must_use]
pub fn tax_document_analysis() -> OutputSchema {
    OutputSchema {
        name: TAX_DOCUMENT_ANALYSIS.into(),
        description: "Compliance analysis of a Mexican tax document (CFDI, constancia, declaración).".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "compliance_status": {
                    "type": "string",
                    "enum": ["compliant", "non_compliant", "needs_review"]
                },
                "issues_found": string_array(),
                "recommendations": string_array(),
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "required_actions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "action": { "type": "string" },
                            "priority": priority(),
                            "deadline": { "type": ["string", "null"] }
                        },
                        "required": ["action", "priority", "deadline"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["compliance_status", "issues_found", "recommendations", "confidence", "required_actions"],
            "additionalProperties": false
        }),
    }
}

/// Schema for refund-eligibility assistance on a prepared request.
#[must_use]
pub fn refund_assistance() -> OutputSchema {
    OutputSchema {
        name: REFUND_ASSISTANCE.into(),
        description: "Eligibility and next steps for a SAT refund request.".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "eligibility": { "type": "string", "enum": ["eligible", "not_eligible", "needs_review"] },
                "estimated_refund": { "type": "number" },
                "required_documents": string_array(),
                "next_steps": string_array(),
                "potential_issues": string_array()
            },
            "required": ["eligibility", "estimated_refund", "required_documents", "next_steps", "potential_issues"],
            "additionalProperties": false
        }),
    }
}

/// Schema for profile-driven recommendations.
#[must_use]
pub fn personalized_recommendations() -> OutputSchema {
    OutputSchema {
        name: PERSONALIZED_RECOMMENDATIONS.into(),
        description: "Tax optimization, refund and compliance recommendations for one taxpayer.".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "tax_optimization": string_array(),
                "refund_opportunities": string_array(),
                "compliance_improvements": string_array(),
                "deadlines_to_watch": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "deadline": { "type": "string" },
                            "description": { "type": "string" },
                            "priority": priority()
                        },
                        "required": ["deadline", "description", "priority"],
                        "additionalProperties": false
                    }
                },
                "estimated_savings": { "type": "number" }
            },
            "required": [
                "tax_optimization",
                "refund_opportunities",
                "compliance_improvements",
                "deadlines_to_watch",
                "estimated_savings"
            ],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
#[path = "schemas_test.rs"]
mod tests;
