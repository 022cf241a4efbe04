//! Execution context store — the versioned key/value map shared across
//! pipeline stages within one workflow invocation.
//!
//! The store is mutated only through [`ExecutionContext::merge`], which
//! respects the meaningfulness classifier: a later, poorly-formed write can
//! never erase good data for a critical key. One instance is created per
//! workflow invocation, owned by the orchestrating pipeline, and never
//! shared across unrelated invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use toolgate_core::meaning::{MeaningPolicy, is_critical, is_meaningful};
use tracing::{debug, info};

/// One stored value plus the stage sequence number that last wrote it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub value: Value,
    /// Stage sequence number of the merge that last updated this entry.
    pub updated_at: u64,
}

/// How a single key fared in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDisposition {
    /// Meaningful value written over no prior value.
    Inserted,
    /// Meaningful value written over an existing value.
    Overwritten,
    /// Non-meaningful write to a critical key with meaningful history,
    /// silently dropped.
    PreservedCritical,
    /// Non-meaningful write with nothing worth protecting, ignored.
    Ignored,
}

/// Per-merge report, consumed by the engine's metrics layer.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub stage: u64,
    pub inserted: Vec<String>,
    pub overwritten: Vec<String>,
    pub preserved_critical: Vec<String>,
    pub ignored: Vec<String>,
}

impl MergeReport {
    /// Total keys the merge was offered.
    pub fn total(&self) -> usize {
        self.inserted.len()
            + self.overwritten.len()
            + self.preserved_critical.len()
            + self.ignored.len()
    }
}

/// A point-in-time, immutable copy of the context for one resolution pass.
///
/// Resolution must never see a context that mutates mid-computation, so the
/// snapshot clones the entries under the read lock and is then free of the
/// store entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    entries: BTreeMap<String, ContextEntry>,
    /// Stage sequence number at snapshot time.
    pub taken_at_stage: u64,
}

impl ContextSnapshot {
    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Get the full entry (value + stage number) by key.
    pub fn entry(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// All keys present in the snapshot, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct ContextState {
    entries: BTreeMap<String, ContextEntry>,
    /// Keys that have ever held a meaningful value, survives overwrites.
    ever_meaningful: BTreeSet<String>,
    /// Monotonic merge counter, used as the stage sequence number.
    stage_seq: u64,
}

/// The execution context for one workflow invocation.
///
/// Thread-safe via `RwLock`: merges from the bounded set of concurrent
/// callers within a single invocation (e.g. an acquisition stage and its
/// sibling archival upload) are fully ordered, and a snapshot taken after a
/// merge completes always reflects that merge.
pub struct ExecutionContext {
    policy: Arc<MeaningPolicy>,
    state: RwLock<ContextState>,
}

impl ExecutionContext {
    /// Create an empty context with the default meaning policy.
    pub fn new() -> Self {
        Self::with_policy(Arc::new(MeaningPolicy::with_defaults()))
    }

    /// Create an empty context with an explicit policy.
    pub fn with_policy(policy: Arc<MeaningPolicy>) -> Self {
        Self {
            policy,
            state: RwLock::new(ContextState::default()),
        }
    }

    /// The policy this context classifies against.
    pub fn policy(&self) -> &MeaningPolicy {
        &self.policy
    }

    /// Merge a stage's structured output into the context.
    ///
    /// Meaningful values overwrite unconditionally. Non-meaningful values
    /// never mutate the store: for a critical key that ever held meaningful
    /// data they are dropped (and reported as preserved), otherwise they are
    /// ignored.
    pub fn merge(&self, updates: impl IntoIterator<Item = (String, Value)>) -> MergeReport {
        let mut state = self.state.write().unwrap();
        state.stage_seq += 1;
        let stage = state.stage_seq;

        let mut report = MergeReport {
            stage,
            ..MergeReport::default()
        };

        for (key, value) in updates {
            if is_meaningful(&value, &key, &self.policy) {
                let existed = state.entries.contains_key(&key);
                state
                    .entries
                    .insert(key.clone(), ContextEntry { value, updated_at: stage });
                state.ever_meaningful.insert(key.clone());
                if existed {
                    report.overwritten.push(key);
                } else {
                    report.inserted.push(key);
                }
            } else if is_critical(&key, &self.policy) && state.ever_meaningful.contains(&key) {
                info!(key = %key, stage, "Critical key preserved: dropped non-meaningful write");
                report.preserved_critical.push(key);
            } else {
                debug!(key = %key, stage, "Ignored non-meaningful write");
                report.ignored.push(key);
            }
        }

        report
    }

    /// Take an immutable point-in-time copy for a resolution pass.
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state.read().unwrap();
        ContextSnapshot {
            entries: state.entries.clone(),
            taken_at_stage: state.stage_seq,
        }
    }

    /// Clear all entries. Called exactly once at workflow start; calling it
    /// twice in a row is equivalent to once.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.entries.clear();
        state.ever_meaningful.clear();
        state.stage_seq = 0;
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    /// Whether the context holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().entries.is_empty()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
