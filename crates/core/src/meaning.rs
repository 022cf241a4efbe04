//! Meaningfulness classifier — decides whether a candidate value is usable
//! or a stand-in.
//!
//! A value is *not* meaningful when it is null/absent, an empty or
//! whitespace-only string, shorter than a configured minimum for free-text
//! keys, or textually equal (case-insensitive) to its own key name or a
//! known boilerplate phrase. Every merge and resolution decision in the
//! engine goes through this predicate, so it is pure and policy-driven:
//! the key sets here are data, not code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Policy knobs for the classifier and for critical-key handling.
///
/// The boundary between "critical" and "non-critical" keys was found
/// empirically in the systems this engine governs, so it ships as an
/// overridable default set rather than a hardcoded one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeaningPolicy {
    /// Minimum character count for free-text keys (trimmed).
    pub min_text_len: usize,

    /// Lowercase phrases that mark a value as a placeholder.
    pub boilerplate: BTreeSet<String>,

    /// Keys carrying primary payload data. Once one of these holds a
    /// meaningful value, a later non-meaningful write must never erase it.
    pub critical_keys: BTreeSet<String>,

    /// Keys whose string values are subject to `min_text_len`.
    pub free_text_keys: BTreeSet<String>,
}

impl MeaningPolicy {
    /// Default policy with the key sets observed in production pipelines.
    pub fn with_defaults() -> Self {
        Self {
            min_text_len: 10,
            boilerplate: [
                "enter text here",
                "n/a",
                "na",
                "none",
                "tbd",
                "todo",
                "placeholder",
                "lorem ipsum",
                "unknown",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            critical_keys: [
                "transcript",
                "enhanced_transcript",
                "content",
                "text",
                "claims",
                "url",
                "file_path",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            free_text_keys: [
                "transcript",
                "enhanced_transcript",
                "content",
                "text",
                "claims",
                "summary",
                "analysis",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl Default for MeaningPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Whether `key` carries primary payload data under this policy.
pub fn is_critical(key: &str, policy: &MeaningPolicy) -> bool {
    policy.critical_keys.contains(key)
}

/// Whether `value` is usable data for `key`, as opposed to a stand-in.
///
/// Non-string values: null is never meaningful; empty arrays/objects are
/// not meaningful; numbers and booleans always are.
pub fn is_meaningful(value: &Value, key: &str, policy: &MeaningPolicy) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) | Value::Number(_) => true,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return false;
            }
            let lowered = trimmed.to_lowercase();
            // A value that merely echoes its own parameter name is a stand-in.
            if lowered == key.to_lowercase() {
                return false;
            }
            if policy.boilerplate.contains(&lowered) {
                return false;
            }
            if policy.free_text_keys.contains(key) && trimmed.chars().count() < policy.min_text_len
            {
                return false;
            }
            true
        }
    }
}
