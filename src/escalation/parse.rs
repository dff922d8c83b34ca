// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Classifier reply parsing

use serde_json::Value;

use super::{ClassifierOutcome, Verdict};

/// Turn free-form classifier text into an outcome.
///
/// Tries the JSON object first, then `KEY: value` lines. Anything else is
/// malformed. Confidence is clamped to 0-100.
pub fn parse_reply(text: &str) -> ClassifierOutcome {
    let verdict = parse_json(text).or_else(|| parse_lines(text));

    match verdict {
        Some(verdict) => ClassifierOutcome::Success {
            verdict,
            raw: Some(text.to_string()),
        },
        None => ClassifierOutcome::Malformed(text.to_string()),
    }
}

fn parse_json(text: &str) -> Option<Verdict> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let object = value.as_object()?;

    let threat = object
        .get("suspicious")
        .or_else(|| object.get("threat"))
        .and_then(as_flag)?;
    let confidence = object.get("confidence").and_then(as_confidence)?;
    let explanation = object
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(Verdict {
        threat,
        confidence,
        explanation,
    })
}

fn parse_lines(text: &str) -> Option<Verdict> {
    let mut threat = None;
    let mut confidence = None;
    let mut explanation = String::new();

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("SUSPICIOUS:") {
            threat = Some(rest.to_uppercase().contains("YES"));
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            confidence = rest.trim().trim_end_matches('%').parse::<f64>().ok().map(clamp);
        } else if let Some(rest) = line.strip_prefix("EXPLANATION:") {
            explanation = rest.trim().to_string();
        }
    }

    Some(Verdict {
        threat: threat?,
        confidence: confidence?,
        explanation,
    })
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_confidence(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_f64().map(clamp),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(clamp),
        _ => None,
    }
}

fn clamp(confidence: f64) -> u8 {
    if confidence.is_nan() {
        return 0;
    }
    confidence.clamp(0.0, 100.0).round() as u8
}
