//! Validation layer — inspects resolved arguments against per-tool-category
//! minimum-content rules before invocation.
//!
//! The pre-execution check is deliberately fail-fast: running a tool on
//! empty or placeholder data silently corrupts every downstream stage,
//! which is strictly worse than an early, explicit rejection. A secondary
//! post-execution scan flags suspicious tool output for observability
//! without failing the stage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use toolgate_core::error::ValidationError;
use toolgate_core::meaning::{MeaningPolicy, is_meaningful};
use toolgate_core::tool::{ArgMap, SemanticClass, ToolCategory, ToolSurface};
use tracing::warn;

/// Content rules for one tool category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    /// Minimum trimmed character count for `Text`-class parameters.
    pub min_text_chars: usize,
}

/// Per-category validation rule table. Data-driven so a new category is a
/// config change, not a code change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRules {
    rules: BTreeMap<ToolCategory, CategoryRule>,
}

impl ValidationRules {
    /// Default thresholds: plain text tools need 10 meaningful characters,
    /// bulk-extraction tools need 50.
    pub fn with_defaults() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(ToolCategory::Text, CategoryRule { min_text_chars: 10 });
        rules.insert(ToolCategory::BulkText, CategoryRule { min_text_chars: 50 });
        rules.insert(ToolCategory::Identifier, CategoryRule { min_text_chars: 0 });
        rules.insert(ToolCategory::Acquisition, CategoryRule { min_text_chars: 0 });
        rules.insert(ToolCategory::General, CategoryRule { min_text_chars: 0 });
        Self { rules }
    }

    /// Override the rule for one category.
    pub fn set(&mut self, category: ToolCategory, rule: CategoryRule) {
        self.rules.insert(category, rule);
    }

    /// The rule for a category (absent categories get no content minimum).
    pub fn rule(&self, category: ToolCategory) -> CategoryRule {
        self.rules
            .get(&category)
            .copied()
            .unwrap_or(CategoryRule { min_text_chars: 0 })
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A non-blocking flag raised by the post-execution output scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFlag {
    pub field: String,
    pub reason: String,
}

/// The validation layer.
pub struct Validator {
    rules: ValidationRules,
    policy: Arc<MeaningPolicy>,
}

impl Validator {
    pub fn new(rules: ValidationRules, policy: Arc<MeaningPolicy>) -> Self {
        Self { rules, policy }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Check resolved arguments against the tool's category rules.
    ///
    /// Only required parameters are content-checked; optional parameters may
    /// legitimately carry empty values. On failure the tool must never be
    /// invoked, and the error carries the tool id, every failing parameter,
    /// and the context keys that *were* available, for diagnosability.
    pub fn validate(
        &self,
        tool: &str,
        category: ToolCategory,
        surface: &ToolSurface,
        final_args: &ArgMap,
        available_context_keys: Vec<String>,
    ) -> Result<(), ValidationError> {
        let rule = self.rules.rule(category);
        let mut failing: Vec<String> = Vec::new();

        for spec in &surface.parameters {
            if !spec.required {
                continue;
            }
            let value = final_args.get(&spec.name);
            if !self.passes(value, &spec.name, spec.semantic_class, rule) {
                failing.push(spec.name.clone());
            }
        }

        if failing.is_empty() {
            Ok(())
        } else {
            warn!(
                tool,
                category = %category,
                parameters = ?failing,
                "Validation blocked tool execution"
            );
            Err(ValidationError::Blocked {
                tool: tool.to_string(),
                parameters: failing,
                available_context_keys,
            })
        }
    }

    /// Scan tool output for suspiciously short or boilerplate content in
    /// fields later stages will depend on. Never blocks — over-eager
    /// post-hoc rejection proved less valuable than visibility.
    pub fn scan_output(&self, tool: &str, data: &ArgMap) -> Vec<OutputFlag> {
        let mut flags = Vec::new();
        for (field, value) in data {
            if !is_meaningful(value, field, &self.policy) {
                flags.push(OutputFlag {
                    field: field.clone(),
                    reason: "non-meaningful output value".into(),
                });
            } else if let Value::String(s) = value {
                if self.policy.free_text_keys.contains(field)
                    && s.trim().chars().count() < self.policy.min_text_len * 2
                {
                    flags.push(OutputFlag {
                        field: field.clone(),
                        reason: "output text suspiciously short".into(),
                    });
                }
            }
        }
        if !flags.is_empty() {
            warn!(tool, flags = flags.len(), "Output scan raised flags");
        }
        flags
    }

    fn passes(
        &self,
        value: Option<&Value>,
        name: &str,
        class: SemanticClass,
        rule: CategoryRule,
    ) -> bool {
        let Some(value) = value else {
            return false;
        };
        if !is_meaningful(value, name, &self.policy) {
            return false;
        }
        match class {
            SemanticClass::Text => match value {
                Value::String(s) => s.trim().chars().count() >= rule.min_text_chars,
                // Structured text payloads (e.g. claim lists) pass on
                // meaningfulness alone.
                _ => true,
            },
            SemanticClass::Url => match value {
                Value::String(s) => {
                    let s = s.trim();
                    (s.starts_with("https://") && s.len() > "https://".len())
                        || (s.starts_with("http://") && s.len() > "http://".len())
                }
                _ => false,
            },
            SemanticClass::Identifier => match value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Number(_) => true,
                _ => false,
            },
            SemanticClass::Metadata | SemanticClass::None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_core::tool::ToolParameterSpec;

    fn validator() -> Validator {
        Validator::new(
            ValidationRules::with_defaults(),
            Arc::new(MeaningPolicy::with_defaults()),
        )
    }

    fn args(pairs: &[(&str, Value)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text_surface() -> ToolSurface {
        ToolSurface::new(vec![ToolParameterSpec::required("text", SemanticClass::Text)])
    }

    #[test]
    fn text_below_minimum_is_blocked() {
        let v = validator();
        let err = v
            .validate(
                "sentiment",
                ToolCategory::Text,
                &text_surface(),
                &args(&[("text", json!("short"))]),
                vec!["url".into()],
            )
            .unwrap_err();

        match err {
            ValidationError::Blocked {
                tool,
                parameters,
                available_context_keys,
            } => {
                assert_eq!(tool, "sentiment");
                assert_eq!(parameters, vec!["text"]);
                assert_eq!(available_context_keys, vec!["url".to_string()]);
            }
        }
    }

    #[test]
    fn text_at_minimum_passes() {
        let v = validator();
        assert!(
            v.validate(
                "sentiment",
                ToolCategory::Text,
                &text_surface(),
                &args(&[("text", json!("exactly ten"))]),
                vec![],
            )
            .is_ok()
        );
    }

    #[test]
    fn bulk_text_needs_fifty_chars() {
        let v = validator();
        let body_short = "a".repeat(49);
        let body_ok = "a".repeat(50);

        assert!(
            v.validate(
                "claim_extraction",
                ToolCategory::BulkText,
                &text_surface(),
                &args(&[("text", json!(body_short))]),
                vec![],
            )
            .is_err()
        );
        assert!(
            v.validate(
                "claim_extraction",
                ToolCategory::BulkText,
                &text_surface(),
                &args(&[("text", json!(body_ok))]),
                vec![],
            )
            .is_ok()
        );
    }

    #[test]
    fn identifier_must_be_non_empty_non_placeholder() {
        let v = validator();
        let surface = ToolSurface::new(vec![ToolParameterSpec::required(
            "episode_id",
            SemanticClass::Identifier,
        )]);

        assert!(
            v.validate("graph_read", ToolCategory::Identifier, &surface,
                &args(&[("episode_id", json!("ep_42"))]), vec![])
            .is_ok()
        );
        assert!(
            v.validate("graph_read", ToolCategory::Identifier, &surface,
                &args(&[("episode_id", json!(""))]), vec![])
            .is_err()
        );
        // A value echoing its own parameter name is a placeholder
        assert!(
            v.validate("graph_read", ToolCategory::Identifier, &surface,
                &args(&[("episode_id", json!("episode_id"))]), vec![])
            .is_err()
        );
    }

    #[test]
    fn url_must_be_well_formed() {
        let v = validator();
        let surface = ToolSurface::new(vec![ToolParameterSpec::required(
            "url",
            SemanticClass::Url,
        )]);

        assert!(
            v.validate("download", ToolCategory::Acquisition, &surface,
                &args(&[("url", json!("https://example.com/ep"))]), vec![])
            .is_ok()
        );
        assert!(
            v.validate("download", ToolCategory::Acquisition, &surface,
                &args(&[("url", json!("example.com/ep"))]), vec![])
            .is_err()
        );
        assert!(
            v.validate("download", ToolCategory::Acquisition, &surface,
                &args(&[("url", json!("https://"))]), vec![])
            .is_err()
        );
    }

    #[test]
    fn missing_required_parameter_is_blocked() {
        let v = validator();
        let err = v
            .validate("sentiment", ToolCategory::Text, &text_surface(), &ArgMap::new(), vec![])
            .unwrap_err();
        let ValidationError::Blocked { parameters, .. } = err;
        assert_eq!(parameters, vec!["text"]);
    }

    #[test]
    fn optional_parameters_are_not_content_checked() {
        let v = validator();
        let surface = ToolSurface::new(vec![
            ToolParameterSpec::required("text", SemanticClass::Text),
            ToolParameterSpec::optional("note", SemanticClass::Text),
        ]);
        assert!(
            v.validate(
                "sentiment",
                ToolCategory::Text,
                &surface,
                &args(&[("text", json!("a perfectly fine input body")), ("note", json!(""))]),
                vec![],
            )
            .is_ok()
        );
    }

    #[test]
    fn all_failing_parameters_reported() {
        let v = validator();
        let surface = ToolSurface::new(vec![
            ToolParameterSpec::required("text", SemanticClass::Text),
            ToolParameterSpec::required("url", SemanticClass::Url),
        ]);
        let err = v
            .validate(
                "archive",
                ToolCategory::Acquisition,
                &surface,
                &args(&[("text", json!("")), ("url", json!("not-a-url"))]),
                vec![],
            )
            .unwrap_err();
        let ValidationError::Blocked { parameters, .. } = err;
        assert_eq!(parameters, vec!["text", "url"]);
    }

    #[test]
    fn output_scan_flags_without_blocking() {
        let v = validator();
        let data = args(&[
            ("transcript", json!("")),
            ("summary", json!("too short")),
            ("title", json!("Episode 42: On Rocks")),
        ]);
        let flags = v.scan_output("transcribe", &data);

        let fields: Vec<&str> = flags.iter().map(|f| f.field.as_str()).collect();
        assert!(fields.contains(&"transcript"));
        assert!(fields.contains(&"summary"));
        assert!(!fields.contains(&"title"));
    }

    #[test]
    fn output_scan_clean_output_has_no_flags() {
        let v = validator();
        let data = args(&[(
            "transcript",
            json!("a transcript easily long enough to clear the short-output heuristic"),
        )]);
        assert!(v.scan_output("transcribe", &data).is_empty());
    }
}
