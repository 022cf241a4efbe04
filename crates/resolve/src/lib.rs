//! Parameter resolution engine — combines a context snapshot and the
//! caller's raw arguments into final call arguments under a strict
//! precedence policy.
//!
//! Aliasing (mapping a `transcript` context key to a tool's `text`
//! parameter) is driven by an explicit, versioned [`ResolutionRules`] table
//! rather than name-pattern conditionals: adding a semantic class or a
//! candidate key is a data change, not a code change. Given identical
//! inputs, `resolve` always produces identical output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use toolgate_context::ContextSnapshot;
use toolgate_core::error::ResolutionError;
use toolgate_core::meaning::{MeaningPolicy, is_critical, is_meaningful};
use toolgate_core::tool::{ArgMap, SemanticClass, ToolSurface};
use tracing::{debug, warn};

/// Versioned table mapping a semantic class to an ordered list of candidate
/// context keys. First meaningful candidate wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionRules {
    /// Bumped whenever the table shape changes, so reports can say which
    /// rule set produced a resolution.
    pub version: u32,
    candidates: BTreeMap<SemanticClass, Vec<String>>,
}

impl ResolutionRules {
    /// The rule table observed to cover the production pipelines.
    pub fn with_defaults() -> Self {
        let mut candidates = BTreeMap::new();
        candidates.insert(
            SemanticClass::Text,
            vec![
                "transcript".to_string(),
                "enhanced_transcript".to_string(),
                "content".to_string(),
                "text".to_string(),
                "summary".to_string(),
            ],
        );
        candidates.insert(
            SemanticClass::Identifier,
            vec![
                "id".to_string(),
                "episode_id".to_string(),
                "file_path".to_string(),
                "claim_id".to_string(),
            ],
        );
        candidates.insert(
            SemanticClass::Url,
            vec![
                "url".to_string(),
                "source_url".to_string(),
                "archive_url".to_string(),
            ],
        );
        candidates.insert(
            SemanticClass::Metadata,
            vec!["metadata".to_string(), "title".to_string()],
        );
        Self {
            version: 1,
            candidates,
        }
    }

    /// An empty table (no fallback aliasing at all).
    pub fn empty() -> Self {
        Self {
            version: 0,
            candidates: BTreeMap::new(),
        }
    }

    /// Build a table from config data. Class names must parse.
    pub fn from_map(
        version: u32,
        rules: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ResolutionError> {
        let mut candidates = BTreeMap::new();
        for (class_name, keys) in rules {
            let class = SemanticClass::parse(class_name)
                .ok_or_else(|| ResolutionError::UnknownSemanticClass(class_name.clone()))?;
            candidates.insert(class, keys.clone());
        }
        Ok(Self {
            version,
            candidates,
        })
    }

    /// Replace the candidate list for one class.
    pub fn set(&mut self, class: SemanticClass, keys: Vec<String>) {
        self.candidates.insert(class, keys);
        self.version += 1;
    }

    /// Ordered candidate keys for a class. Empty for unknown classes.
    pub fn candidates(&self, class: SemanticClass) -> &[String] {
        self.candidates
            .get(&class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for ResolutionRules {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// One fallback assignment made during resolution: `parameter` was filled
/// from context key `source_key` via its semantic class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackHit {
    pub parameter: String,
    pub source_key: String,
}

/// The output of a successful resolution pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedArgs {
    /// Final call arguments.
    pub args: ArgMap,
    /// Which candidate key satisfied which parameter (for observability).
    pub fallbacks: Vec<FallbackHit>,
    /// Rule table version used.
    pub rules_version: u32,
}

/// The resolution engine.
pub struct Resolver {
    rules: ResolutionRules,
    policy: Arc<MeaningPolicy>,
    /// Workflow-control keys that must never reach a tool's argument list,
    /// even for tools accepting arbitrary extras.
    context_only: BTreeSet<String>,
}

impl Resolver {
    pub fn new(rules: ResolutionRules, policy: Arc<MeaningPolicy>) -> Self {
        Self {
            rules,
            policy,
            context_only: default_context_only_keys(),
        }
    }

    /// Override the context-only key set.
    pub fn with_context_only_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.context_only = keys;
        self
    }

    pub fn rules(&self) -> &ResolutionRules {
        &self.rules
    }

    pub fn context_only_keys(&self) -> &BTreeSet<String> {
        &self.context_only
    }

    /// Produce final call arguments for `tool` from the caller's raw
    /// arguments and a context snapshot.
    ///
    /// Precedence, in order:
    /// 1. context values seeded onto same-named declared parameters
    /// 2. meaningful caller arguments (caller intent wins)
    /// 3. semantic-class fallback through the rule table
    /// 4. context-only keys stripped
    /// 5. undeclared keys dropped unless the tool accepts arbitrary extras
    /// 6. declared defaults applied
    ///
    /// Fails with [`ResolutionError::Gap`] if a required parameter still has
    /// no meaningful value after all of the above.
    pub fn resolve(
        &self,
        tool: &str,
        surface: &ToolSurface,
        raw_args: &ArgMap,
        context: &ContextSnapshot,
    ) -> Result<ResolvedArgs, ResolutionError> {
        let mut final_args: ArgMap = ArgMap::new();
        let mut seeded_from_context: BTreeSet<String> = BTreeSet::new();
        let mut fallbacks: Vec<FallbackHit> = Vec::new();

        // 1. Seed declared parameters from same-named context keys.
        for spec in &surface.parameters {
            if let Some(value) = context.get(&spec.name) {
                final_args.insert(spec.name.clone(), value.clone());
                seeded_from_context.insert(spec.name.clone());
            }
        }

        // 2. Caller arguments: meaningful values always win. Non-meaningful
        //    values are kept only for non-critical keys that were not seeded
        //    from context (explicit empties on genuinely optional fields).
        for (key, value) in raw_args {
            if is_meaningful(value, key, &self.policy) {
                final_args.insert(key.clone(), value.clone());
            } else if !seeded_from_context.contains(key) && !is_critical(key, &self.policy) {
                final_args.insert(key.clone(), value.clone());
            }
        }

        // 3. Semantic-class fallback for declared parameters that are still
        //    unset or non-meaningful. An optional parameter with a declared
        //    default keeps its default rather than borrowing context data.
        for spec in &surface.parameters {
            if !spec.required && spec.default.is_some() {
                continue;
            }
            let needs_fallback = match final_args.get(&spec.name) {
                Some(v) => !is_meaningful(v, &spec.name, &self.policy),
                None => true,
            };
            if !needs_fallback {
                continue;
            }
            for candidate in self.rules.candidates(spec.semantic_class) {
                let Some(value) = context.get(candidate) else {
                    continue;
                };
                if is_meaningful(value, candidate, &self.policy) {
                    debug!(
                        tool,
                        parameter = %spec.name,
                        source_key = %candidate,
                        "Resolution fallback satisfied parameter from context"
                    );
                    final_args.insert(spec.name.clone(), value.clone());
                    fallbacks.push(FallbackHit {
                        parameter: spec.name.clone(),
                        source_key: candidate.clone(),
                    });
                    break;
                }
            }
        }

        // 4. Workflow-control metadata never reaches a tool.
        for key in &self.context_only {
            final_args.remove(key);
        }

        // 5. Drop undeclared keys unless the tool accepts arbitrary extras.
        if !surface.accepts_arbitrary_extra {
            final_args.retain(|key, _| surface.declares(key));
        }

        // 6. Declared defaults for parameters still unset.
        for spec in &surface.parameters {
            if !final_args.contains_key(&spec.name) {
                if let Some(default) = &spec.default {
                    final_args.insert(spec.name.clone(), default.clone());
                }
            }
        }

        // Required parameters must now hold a meaningful value.
        for spec in &surface.parameters {
            if !spec.required {
                continue;
            }
            let satisfied = final_args
                .get(&spec.name)
                .is_some_and(|v| is_meaningful(v, &spec.name, &self.policy));
            if !satisfied {
                warn!(
                    tool,
                    parameter = %spec.name,
                    "Resolution gap: no meaningful source for required parameter"
                );
                return Err(ResolutionError::Gap {
                    tool: tool.to_string(),
                    parameter: spec.name.clone(),
                    available_context_keys: context.keys(),
                });
            }
        }

        Ok(ResolvedArgs {
            args: final_args,
            fallbacks,
            rules_version: self.rules.version,
        })
    }
}

/// Workflow-control keys stripped from every argument list by default.
pub fn default_context_only_keys() -> BTreeSet<String> {
    ["depth", "tenant_id", "workflow_id", "budget_tier", "stage"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Convenience: build raw args from pairs (tests and orchestrators).
pub fn args(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> ArgMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
