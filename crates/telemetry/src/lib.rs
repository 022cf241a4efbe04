//! Governance metrics — thread-safe counters for everything the engine
//! gates: context merges (critical key preserved vs overwritten),
//! resolution fallback usage, validation and budget rejections, and
//! circuit breaker transitions.
//!
//! The engine records; an external metrics collaborator scrapes
//! [`GovernanceMetrics::snapshot`] (serializable) on its own schedule.
//! Nothing here is request-scoped: one metrics instance typically serves a
//! whole process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Counters for context merge dispositions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeCounters {
    /// Meaningful value written over no prior value.
    pub inserted: u64,
    /// Meaningful value written over an existing value.
    pub overwritten: u64,
    /// Non-meaningful write to a critical key dropped in favor of
    /// existing meaningful data.
    pub critical_preserved: u64,
    /// Non-meaningful write with nothing to protect.
    pub ignored: u64,
}

/// Serializable point-in-time view of all counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub merges: MergeCounters,
    /// `parameter <- source_key` fallback hits.
    pub resolution_fallbacks: BTreeMap<String, u64>,
    /// `tool :: parameter` validation rejections.
    pub validation_rejections: BTreeMap<String, u64>,
    /// Budget rejections per task name.
    pub budget_rejections: BTreeMap<String, u64>,
    /// `resource -> state` breaker transitions.
    pub breaker_transitions: BTreeMap<String, u64>,
}

/// The governance metrics collector.
#[derive(Debug, Default)]
pub struct GovernanceMetrics {
    merges: RwLock<MergeCounters>,
    resolution_fallbacks: RwLock<BTreeMap<String, u64>>,
    validation_rejections: RwLock<BTreeMap<String, u64>>,
    budget_rejections: RwLock<BTreeMap<String, u64>>,
    breaker_transitions: RwLock<BTreeMap<String, u64>>,
}

impl GovernanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one merge's dispositions (counts per class of outcome).
    pub fn record_merge(
        &self,
        inserted: usize,
        overwritten: usize,
        critical_preserved: usize,
        ignored: usize,
    ) {
        let mut merges = self.merges.write().unwrap();
        merges.inserted += inserted as u64;
        merges.overwritten += overwritten as u64;
        merges.critical_preserved += critical_preserved as u64;
        merges.ignored += ignored as u64;
    }

    /// Record that `parameter` was satisfied from context key `source_key`.
    pub fn record_resolution_fallback(&self, parameter: &str, source_key: &str) {
        let mut fallbacks = self.resolution_fallbacks.write().unwrap();
        *fallbacks
            .entry(format!("{parameter} <- {source_key}"))
            .or_insert(0) += 1;
    }

    /// Record a validation rejection for one tool parameter.
    pub fn record_validation_rejection(&self, tool: &str, parameter: &str) {
        let mut rejections = self.validation_rejections.write().unwrap();
        *rejections.entry(format!("{tool} :: {parameter}")).or_insert(0) += 1;
    }

    /// Record a budget rejection for a task.
    pub fn record_budget_rejection(&self, task: &str) {
        let mut rejections = self.budget_rejections.write().unwrap();
        *rejections.entry(task.to_string()).or_insert(0) += 1;
    }

    /// Record a circuit breaker transition into `state` for a resource.
    pub fn record_breaker_transition(&self, resource: &str, state: &str) {
        let mut transitions = self.breaker_transitions.write().unwrap();
        *transitions
            .entry(format!("{resource} -> {state}"))
            .or_insert(0) += 1;
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generated_at: Utc::now(),
            merges: *self.merges.read().unwrap(),
            resolution_fallbacks: self.resolution_fallbacks.read().unwrap().clone(),
            validation_rejections: self.validation_rejections.read().unwrap().clone(),
            budget_rejections: self.budget_rejections.read().unwrap().clone(),
            breaker_transitions: self.breaker_transitions.read().unwrap().clone(),
        }
    }

    /// Zero every counter (test isolation).
    pub fn reset(&self) {
        *self.merges.write().unwrap() = MergeCounters::default();
        self.resolution_fallbacks.write().unwrap().clear();
        self.validation_rejections.write().unwrap().clear();
        self.budget_rejections.write().unwrap().clear();
        self.breaker_transitions.write().unwrap().clear();
    }
}
