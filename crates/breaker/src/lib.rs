//! Circuit breaker registry — per-external-resource failure tracking that
//! stops calling a failing resource until a cooldown and a trial call
//! succeed.
//!
//! State machine per resource key: CLOSED (calls pass, consecutive failures
//! counted) → after N consecutive failures → OPEN (calls rejected without
//! attempting the operation) → after the cooldown elapses → HALF_OPEN
//! (exactly one trial call) → success returns to CLOSED, failure returns to
//! OPEN with an exponentially longer cooldown.
//!
//! Breaker state is the one piece of engine state that intentionally
//! outlives a workflow invocation, so `reset`/`reset_all` are exposed
//! explicitly for test and cross-invocation isolation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use toolgate_core::error::BreakerError;
use tracing::{info, warn};

/// State of one resource's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// Exactly one trial call is permitted.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker tuning, shared by every resource in a registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED → OPEN.
    pub failure_threshold: u32,
    /// Initial OPEN cooldown.
    pub cooldown: Duration,
    /// Cooldown multiplier applied on each failed HALF_OPEN trial.
    pub backoff_multiplier: f64,
    /// Upper bound on the grown cooldown.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(240),
        }
    }
}

/// A state transition, surfaced so the caller can record it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub resource: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Point-in-time view of one resource's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub resource: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub current_cooldown: Duration,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug)]
struct ResourceBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    /// Whether the single HALF_OPEN trial is already taken.
    trial_in_flight: bool,
    last_transition: DateTime<Utc>,
}

impl ResourceBreaker {
    fn new(config: &BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            current_cooldown: config.cooldown,
            trial_in_flight: false,
            last_transition: Utc::now(),
        }
    }

    fn transition(&mut self, to: BreakerState) -> BreakerState {
        let from = self.state;
        self.state = to;
        self.last_transition = Utc::now();
        from
    }
}

/// The per-resource circuit breaker registry.
///
/// Keyed by external resource (typically a hostname). Thread-safe: the
/// registry map is behind an `RwLock` and each breaker behind its own
/// `Mutex`, so unrelated resources never contend.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Mutex<ResourceBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask permission to call `resource`.
    ///
    /// CLOSED passes. OPEN rejects until the cooldown elapses, then flips to
    /// HALF_OPEN and admits exactly one trial call; further callers are
    /// rejected until that trial reports back via [`Self::record_success`],
    /// [`Self::record_failure`], or [`Self::record_skip`].
    pub fn try_acquire(&self, resource: &str) -> Result<Option<Transition>, BreakerError> {
        self.with_breaker(resource, |b| match b.state {
            BreakerState::Closed => Ok(None),
            BreakerState::Open => {
                let elapsed = b.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= b.current_cooldown {
                    let from = b.transition(BreakerState::HalfOpen);
                    b.trial_in_flight = true;
                    info!(resource, "Circuit half-open: admitting one trial call");
                    Ok(Some(Transition {
                        resource: resource.to_string(),
                        from,
                        to: BreakerState::HalfOpen,
                    }))
                } else {
                    let remaining = b.current_cooldown.saturating_sub(elapsed);
                    Err(BreakerError::Open {
                        resource: resource.to_string(),
                        retry_after_ms: remaining.as_millis() as u64,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if b.trial_in_flight {
                    Err(BreakerError::Open {
                        resource: resource.to_string(),
                        retry_after_ms: b.current_cooldown.as_millis() as u64,
                    })
                } else {
                    b.trial_in_flight = true;
                    Ok(None)
                }
            }
        })
    }

    /// Record a successful call against `resource`.
    pub fn record_success(&self, resource: &str) -> Option<Transition> {
        self.with_breaker(resource, |b| match b.state {
            BreakerState::Closed => {
                b.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                let from = b.transition(BreakerState::Closed);
                b.consecutive_failures = 0;
                b.opened_at = None;
                b.current_cooldown = self.config.cooldown;
                b.trial_in_flight = false;
                info!(resource, "Circuit closed after successful trial");
                Some(Transition {
                    resource: resource.to_string(),
                    from,
                    to: BreakerState::Closed,
                })
            }
            // A success reported while open carries no new permission; leave
            // the cooldown clock alone.
            BreakerState::Open => None,
        })
    }

    /// Record a failed call against `resource`.
    pub fn record_failure(&self, resource: &str) -> Option<Transition> {
        self.with_breaker(resource, |b| match b.state {
            BreakerState::Closed => {
                b.consecutive_failures += 1;
                if b.consecutive_failures >= self.config.failure_threshold {
                    let from = b.transition(BreakerState::Open);
                    b.opened_at = Some(Instant::now());
                    b.current_cooldown = self.config.cooldown;
                    warn!(
                        resource,
                        failures = b.consecutive_failures,
                        "Circuit opened after consecutive failures"
                    );
                    Some(Transition {
                        resource: resource.to_string(),
                        from,
                        to: BreakerState::Open,
                    })
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                let from = b.transition(BreakerState::Open);
                b.opened_at = Some(Instant::now());
                b.trial_in_flight = false;
                // Failed trial: cooldown restarts, grown by the backoff factor.
                let grown = b.current_cooldown.mul_f64(self.config.backoff_multiplier);
                b.current_cooldown = grown.min(self.config.max_cooldown);
                warn!(
                    resource,
                    cooldown_ms = b.current_cooldown.as_millis() as u64,
                    "Circuit re-opened after failed trial"
                );
                Some(Transition {
                    resource: resource.to_string(),
                    from,
                    to: BreakerState::Open,
                })
            }
            BreakerState::Open => None,
        })
    }

    /// Record that a call released its slot without reaching `resource`
    /// (the tool skipped). Carries no health signal either way: a HALF_OPEN
    /// trial returns to OPEN with the cooldown restarted and no backoff, so
    /// the next cooldown expiry admits a fresh trial.
    pub fn record_skip(&self, resource: &str) -> Option<Transition> {
        self.with_breaker(resource, |b| match b.state {
            BreakerState::HalfOpen => {
                let from = b.transition(BreakerState::Open);
                b.opened_at = Some(Instant::now());
                b.trial_in_flight = false;
                info!(resource, "Trial skipped: circuit re-opened without backoff");
                Some(Transition {
                    resource: resource.to_string(),
                    from,
                    to: BreakerState::Open,
                })
            }
            BreakerState::Closed | BreakerState::Open => None,
        })
    }

    /// Current state for a resource (Closed for resources never seen).
    pub fn state(&self, resource: &str) -> BreakerState {
        let breakers = self.breakers.read().unwrap();
        breakers
            .get(resource)
            .map(|b| b.lock().unwrap().state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Stats for a resource, if it has been seen.
    pub fn stats(&self, resource: &str) -> Option<BreakerStats> {
        let breakers = self.breakers.read().unwrap();
        breakers.get(resource).map(|b| {
            let b = b.lock().unwrap();
            BreakerStats {
                resource: resource.to_string(),
                state: b.state,
                consecutive_failures: b.consecutive_failures,
                current_cooldown: b.current_cooldown,
                last_transition: b.last_transition,
            }
        })
    }

    /// Drop one resource's state entirely (next call starts CLOSED).
    pub fn reset(&self, resource: &str) {
        let mut breakers = self.breakers.write().unwrap();
        breakers.remove(resource);
    }

    /// Drop all breaker state. Exposed for test and cross-invocation
    /// isolation.
    pub fn reset_all(&self) {
        let mut breakers = self.breakers.write().unwrap();
        breakers.clear();
    }

    /// Run `f` against the breaker for `resource`, creating it if absent.
    ///
    /// A concurrent `reset` can remove the entry between lock acquisitions,
    /// so the insert path loops back to the read path instead of assuming
    /// the entry is still there.
    fn with_breaker<T>(&self, resource: &str, f: impl FnOnce(&mut ResourceBreaker) -> T) -> T {
        loop {
            {
                let breakers = self.breakers.read().unwrap();
                if let Some(b) = breakers.get(resource) {
                    return f(&mut b.lock().unwrap());
                }
            }
            let mut breakers = self.breakers.write().unwrap();
            breakers
                .entry(resource.to_string())
                .or_insert_with(|| Mutex::new(ResourceBreaker::new(&self.config)));
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
