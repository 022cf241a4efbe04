//! Configuration loading and validation for Toolgate.
//!
//! Everything the spec's bug history showed should be data rather than code
//! lives here: the critical-key set, boilerplate phrases, minimum text
//! lengths, context-only keys, resolution rule overrides, budget tiers, and
//! breaker thresholds. Loaded from a TOML file with serde defaults, then
//! validated before the engine accepts it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use toolgate_core::meaning::MeaningPolicy;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The root governance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GovernanceConfig {
    /// Meaningfulness classifier and critical-key policy.
    #[serde(default)]
    pub meaning: MeaningSection,

    /// Resolution rule table and context-only keys.
    #[serde(default)]
    pub resolution: ResolutionSection,

    /// Per-category minimum-content thresholds.
    #[serde(default)]
    pub validation: ValidationSection,

    /// Named budget tiers.
    #[serde(default)]
    pub budget: BudgetSection,

    /// Circuit breaker tuning.
    #[serde(default)]
    pub breaker: BreakerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeaningSection {
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// Extra boilerplate phrases, merged into the built-in set.
    #[serde(default)]
    pub extra_boilerplate: Vec<String>,

    /// Full replacement of the critical-key set when non-empty.
    #[serde(default)]
    pub critical_keys: Vec<String>,

    /// Full replacement of the free-text key set when non-empty.
    #[serde(default)]
    pub free_text_keys: Vec<String>,
}

fn default_min_text_len() -> usize {
    10
}

impl Default for MeaningSection {
    fn default() -> Self {
        Self {
            min_text_len: default_min_text_len(),
            extra_boilerplate: Vec::new(),
            critical_keys: Vec::new(),
            free_text_keys: Vec::new(),
        }
    }
}

impl MeaningSection {
    /// Build the classifier policy: built-in defaults with this section's
    /// overrides applied.
    pub fn to_policy(&self) -> MeaningPolicy {
        let mut policy = MeaningPolicy::with_defaults();
        policy.min_text_len = self.min_text_len;
        for phrase in &self.extra_boilerplate {
            policy.boilerplate.insert(phrase.to_lowercase());
        }
        if !self.critical_keys.is_empty() {
            policy.critical_keys = self.critical_keys.iter().cloned().collect();
        }
        if !self.free_text_keys.is_empty() {
            policy.free_text_keys = self.free_text_keys.iter().cloned().collect();
        }
        policy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResolutionSection {
    /// Rule table version; bump when editing `rules`.
    #[serde(default)]
    pub version: u32,

    /// semantic class name -> ordered candidate context keys.
    /// Empty means use the built-in table.
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<String>>,

    /// Full replacement of the context-only key set when non-empty.
    #[serde(default)]
    pub context_only_keys: Vec<String>,
}

impl ResolutionSection {
    pub fn context_only_set(&self) -> Option<BTreeSet<String>> {
        if self.context_only_keys.is_empty() {
            None
        } else {
            Some(self.context_only_keys.iter().cloned().collect())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSection {
    #[serde(default = "default_text_chars")]
    pub text_min_chars: usize,

    #[serde(default = "default_bulk_text_chars")]
    pub bulk_text_min_chars: usize,
}

fn default_text_chars() -> usize {
    10
}
fn default_bulk_text_chars() -> usize {
    50
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            text_min_chars: default_text_chars(),
            bulk_text_min_chars: default_bulk_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetSection {
    /// Tier selected when the caller names none.
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Named tiers. Empty means use the built-in table.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierSection>,
}

fn default_tier() -> String {
    "standard".into()
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            tiers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierSection {
    pub total: f64,
    #[serde(default)]
    pub per_task: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_cooldown_secs() -> u64 {
    240
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

impl BreakerSection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }
}

impl GovernanceConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded governance config");
        Ok(config)
    }

    /// Load from the path in `TOOLGATE_CONFIG`, or fall back to the
    /// built-in defaults when the variable is unset.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var("TOOLGATE_CONFIG") {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meaning.min_text_len == 0 {
            return Err(ConfigError::Invalid(
                "meaning.min_text_len must be at least 1".into(),
            ));
        }

        for class_name in self.resolution.rules.keys() {
            if toolgate_core::tool::SemanticClass::parse(class_name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "resolution.rules has unknown semantic class '{class_name}'"
                )));
            }
        }

        for (name, tier) in &self.budget.tiers {
            if !tier.total.is_finite() || tier.total <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "budget tier '{name}' has non-positive total limit"
                )));
            }
            for (task, limit) in &tier.per_task {
                if !limit.is_finite() || *limit <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "budget tier '{name}' task '{task}' has non-positive limit"
                    )));
                }
                if *limit > tier.total {
                    return Err(ConfigError::Invalid(format!(
                        "budget tier '{name}' task '{task}' limit exceeds the tier total"
                    )));
                }
            }
        }
        if !self.budget.tiers.is_empty() && !self.budget.tiers.contains_key(&self.budget.default_tier)
        {
            return Err(ConfigError::Invalid(format!(
                "budget.default_tier '{}' is not a configured tier",
                self.budget.default_tier
            )));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.breaker.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "breaker.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.breaker.max_cooldown_secs < self.breaker.cooldown_secs {
            return Err(ConfigError::Invalid(
                "breaker.max_cooldown_secs must be >= breaker.cooldown_secs".into(),
            ));
        }

        Ok(())
    }
}
