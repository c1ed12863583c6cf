//! Parsing and validation of Analysis Service replies.
//!
//! Models wrap JSON in markdown fences, omit fields, and sometimes return
//! findings with `explanation` instead of `value`. Everything here is
//! lenient about shape and strict about the invariants that reach the
//! database: a summary is present, and every finding has a non-empty
//! marker and value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use secondlight_core::defaults::NOT_SPECIFIED;
use secondlight_core::{FindingCategory, NewKeyFinding};

use crate::error::AnalysisError;
use crate::prompts::REJECTION_KEY;

/// Word stems that mark a document as a lab report regardless of the
/// model's opinion. Matched at the start of a word, so "tests" and
/// "bloodwork" count but "latest" does not.
static LAB_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(blood|test|laborator|specimen)\w*").expect("lab keyword regex is valid")
});

/// A validated analysis reply.
#[derive(Debug, Clone)]
pub struct ParsedAnalysis {
    pub summary: String,
    pub key_findings: Vec<NewKeyFinding>,
    pub recommendations: Vec<String>,
    /// The reply as parsed, kept for the processing log.
    pub raw: JsonValue,
}

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line, e.g. "json"
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse JSON, retrying once with code fences stripped.
pub fn parse_json_lenient(raw: &str) -> Result<JsonValue, serde_json::Error> {
    let direct_err = match serde_json::from_str::<JsonValue>(raw.trim()) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };
    let stripped = strip_code_fences(raw);
    if stripped.len() != raw.trim().len() {
        if let Ok(v) = serde_json::from_str::<JsonValue>(stripped) {
            return Ok(v);
        }
    }
    Err(direct_err)
}

/// Whether the text contains words typical of a lab report.
pub fn contains_lab_keywords(text: &str) -> bool {
    LAB_KEYWORDS.is_match(text)
}

fn non_empty_str(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map one model-supplied finding. Returns `None` when it has no marker.
pub fn map_finding(value: &JsonValue) -> Option<NewKeyFinding> {
    let obj = value.as_object()?;
    let marker = non_empty_str(obj.get("marker"))
        .or_else(|| non_empty_str(obj.get("name")))?;
    let value = non_empty_str(obj.get("value"))
        .or_else(|| non_empty_str(obj.get("explanation")))
        .unwrap_or_else(|| NOT_SPECIFIED.to_string());
    let category = obj
        .get("category")
        .and_then(JsonValue::as_str)
        .map(FindingCategory::from_label)
        .unwrap_or_default();

    Some(NewKeyFinding {
        marker,
        value,
        reference_range: non_empty_str(obj.get("reference_range")),
        interpretation: non_empty_str(obj.get("interpretation")),
        category,
    })
}

fn map_findings(items: &[JsonValue]) -> Vec<NewKeyFinding> {
    items.iter().filter_map(map_finding).collect()
}

fn map_recommendations(value: Option<&JsonValue>) -> Vec<String> {
    let Some(JsonValue::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Object(o) => non_empty_str(o.get("content"))
                .or_else(|| non_empty_str(o.get("recommendation"))),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn rejection_reason(obj: &Map<String, JsonValue>) -> Option<String> {
    match obj.get(REJECTION_KEY)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse and validate the main analysis reply.
///
/// `document_text` is only consulted for the lab-keyword override.
pub fn parse_analysis(
    reply: &str,
    document_text: &str,
    lab_keyword_override: bool,
) -> Result<ParsedAnalysis, AnalysisError> {
    if reply.trim().is_empty() {
        return Err(AnalysisError::InvalidResponse(
            "No response from analysis service".to_string(),
        ));
    }

    let raw = parse_json_lenient(reply).map_err(|e| {
        AnalysisError::InvalidResponse(format!("Failed to parse analysis response: {}", e))
    })?;

    let obj = raw.as_object().ok_or_else(|| {
        AnalysisError::InvalidResponse("Analysis response is not a JSON object".to_string())
    })?;

    if let Some(reason) = rejection_reason(obj) {
        if lab_keyword_override && contains_lab_keywords(document_text) {
            return Err(AnalysisError::Misclassified);
        }
        return Err(AnalysisError::NotMedical(reason));
    }

    let summary = non_empty_str(obj.get("summary")).ok_or_else(|| {
        AnalysisError::InvalidResponse("Analysis response is missing a summary".to_string())
    })?;

    let findings = obj
        .get("key_findings")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| {
            AnalysisError::InvalidResponse(
                "Analysis response is missing the key_findings array".to_string(),
            )
        })?;

    Ok(ParsedAnalysis {
        summary,
        key_findings: map_findings(findings),
        recommendations: map_recommendations(obj.get("recommendations")),
        raw,
    })
}

/// Parse the findings-only fallback reply.
///
/// Accepts a bare array or an object wrapping one array. Entries without a
/// marker are dropped; an unparsable reply is an error.
pub fn parse_findings(reply: &str) -> Result<Vec<NewKeyFinding>, AnalysisError> {
    let raw = parse_json_lenient(reply).map_err(|e| {
        AnalysisError::InvalidResponse(format!("Failed to parse findings response: {}", e))
    })?;

    let items = match &raw {
        JsonValue::Array(items) => items,
        JsonValue::Object(obj) => obj
            .get("key_findings")
            .or_else(|| obj.get("findings"))
            .and_then(JsonValue::as_array)
            .or_else(|| obj.values().find_map(JsonValue::as_array))
            .ok_or_else(|| {
                AnalysisError::InvalidResponse("Findings response has no array".to_string())
            })?,
        _ => {
            return Err(AnalysisError::InvalidResponse(
                "Findings response is not an array".to_string(),
            ))
        }
    };

    Ok(map_findings(items))
}
