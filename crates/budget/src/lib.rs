//! Budget ledger — request-scoped spend accounting with a total limit and
//! per-task sub-limits.
//!
//! A ledger is opened from a named tier at workflow start, owned by exactly
//! one invocation, and destroyed at workflow end. The only mutation is the
//! atomic [`BudgetLedger::charge`]: check-then-commit inside a single
//! critical section, so two stages charging concurrently can never both
//! pass a check that, combined, exceeds a limit. A rejected charge mutates
//! nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use toolgate_core::error::BudgetError;
use tracing::{debug, warn};

/// A named spend preset: total limit plus optional per-task limits, in USD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetTier {
    pub name: String,
    pub total_limit: f64,
    pub per_task_limits: BTreeMap<String, f64>,
}

impl BudgetTier {
    pub fn new(name: impl Into<String>, total_limit: f64) -> Self {
        Self {
            name: name.into(),
            total_limit,
            per_task_limits: BTreeMap::new(),
        }
    }

    /// Add a per-task limit.
    pub fn with_task_limit(mut self, task: impl Into<String>, limit: f64) -> Self {
        self.per_task_limits.insert(task.into(), limit);
        self
    }
}

/// Named-tier table with built-in presets and config overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierTable {
    tiers: BTreeMap<String, BudgetTier>,
}

impl TierTable {
    /// Built-in tiers keyed by requested analysis depth.
    pub fn with_defaults() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "quick".to_string(),
            BudgetTier::new("quick", 0.50)
                .with_task_limit("acquisition", 0.05)
                .with_task_limit("analysis", 0.30),
        );
        tiers.insert(
            "standard".to_string(),
            BudgetTier::new("standard", 1.50)
                .with_task_limit("acquisition", 0.15)
                .with_task_limit("analysis", 0.75)
                .with_task_limit("verification", 0.40),
        );
        tiers.insert(
            "deep".to_string(),
            BudgetTier::new("deep", 5.00)
                .with_task_limit("acquisition", 0.50)
                .with_task_limit("analysis", 2.50)
                .with_task_limit("verification", 1.50),
        );
        Self { tiers }
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self {
            tiers: BTreeMap::new(),
        }
    }

    /// Add or replace a tier.
    pub fn set(&mut self, tier: BudgetTier) {
        self.tiers.insert(tier.name.clone(), tier);
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&BudgetTier> {
        self.tiers.get(name)
    }

    /// Tier names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tiers.keys().cloned().collect()
    }

    /// Open a fresh ledger for one workflow invocation.
    pub fn open(&self, tier_name: &str) -> Result<BudgetLedger, BudgetError> {
        let tier = self
            .tiers
            .get(tier_name)
            .cloned()
            .ok_or_else(|| BudgetError::UnknownTier(tier_name.to_string()))?;
        Ok(BudgetLedger::open(tier))
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Returned by an authorized charge: the committed totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeReceipt {
    pub task: String,
    pub amount: f64,
    pub total_spent: f64,
    pub task_spent: f64,
    /// Total spend as a percentage of the total limit.
    pub utilization_pct: f64,
}

/// Read-only ledger report for the invoking caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSummary {
    pub tier: String,
    pub total_limit: f64,
    pub total_spent: f64,
    pub per_task_spent: BTreeMap<String, f64>,
    pub utilization_pct: f64,
}

#[derive(Debug, Default)]
struct LedgerState {
    total_spent: f64,
    per_task_spent: BTreeMap<String, f64>,
}

/// The request-scoped budget ledger.
pub struct BudgetLedger {
    tier: BudgetTier,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    /// Open a ledger against a tier. One per workflow invocation.
    pub fn open(tier: BudgetTier) -> Self {
        Self {
            tier,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// The tier this ledger enforces.
    pub fn tier(&self) -> &BudgetTier {
        &self.tier
    }

    /// Atomically authorize and commit a charge.
    ///
    /// Rejects, without mutating any state, if the charge would push total
    /// spend over the tier limit or task spend over a configured task limit.
    /// A rejected charge leaves the ledger exactly as it was.
    pub fn charge(&self, amount: f64, task: &str) -> Result<ChargeReceipt, BudgetError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(BudgetError::InvalidAmount(amount));
        }

        let mut state = self.state.lock().unwrap();

        let new_total = state.total_spent + amount;
        if new_total > self.tier.total_limit {
            warn!(
                task,
                amount,
                total_spent = state.total_spent,
                limit = self.tier.total_limit,
                "Charge rejected: total budget would be exceeded"
            );
            return Err(BudgetError::TotalExceeded {
                requested: amount,
                spent: state.total_spent,
                limit: self.tier.total_limit,
            });
        }

        let task_spent = state.per_task_spent.get(task).copied().unwrap_or(0.0);
        if let Some(&task_limit) = self.tier.per_task_limits.get(task) {
            let new_task_total = task_spent + amount;
            if new_task_total > task_limit {
                warn!(
                    task,
                    amount,
                    task_spent,
                    limit = task_limit,
                    "Charge rejected: task budget would be exceeded"
                );
                return Err(BudgetError::TaskExceeded {
                    task: task.to_string(),
                    requested: amount,
                    spent: task_spent,
                    limit: task_limit,
                });
            }
        }

        // Both checks passed: commit both totals under the same lock.
        let new_task_total = task_spent + amount;
        state.total_spent = new_total;
        state.per_task_spent.insert(task.to_string(), new_task_total);

        debug!(task, amount, total_spent = new_total, "Charge authorized");
        Ok(ChargeReceipt {
            task: task.to_string(),
            amount,
            total_spent: new_total,
            task_spent: new_task_total,
            utilization_pct: utilization(new_total, self.tier.total_limit),
        })
    }

    /// Read-only summary for reporting.
    pub fn summary(&self) -> LedgerSummary {
        let state = self.state.lock().unwrap();
        LedgerSummary {
            tier: self.tier.name.clone(),
            total_limit: self.tier.total_limit,
            total_spent: state.total_spent,
            per_task_spent: state.per_task_spent.clone(),
            utilization_pct: utilization(state.total_spent, self.tier.total_limit),
        }
    }
}

fn utilization(spent: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return 0.0;
    }
    (spent / limit) * 100.0
}
