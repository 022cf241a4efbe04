//! Error types for the Toolgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each pre-execution gate
//! has its own error variant so the orchestrator can tell exactly which gate
//! rejected a call, and every rejection carries enough structured detail to
//! diagnose without re-running the workflow.

use thiserror::Error;

/// The top-level error type for all Toolgate operations.
///
/// `Resolution`, `Validation`, `Budget`, and `Breaker` are pre-execution
/// gates: the tool is never invoked when one of them fires. `Tool` wraps
/// failures raised by the tool itself after it passed every gate, so the
/// caller sees one uniform result type regardless of where a failure
/// originated.
#[derive(Debug, Error)]
pub enum Error {
    // --- Pre-execution gates ---
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Circuit breaker error: {0}")]
    Breaker(#[from] BreakerError),

    // --- Tool boundary ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Gate errors ---

#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// A required parameter had no meaningful source anywhere —
    /// neither the caller's arguments nor the context could supply it.
    #[error(
        "No meaningful source for required parameter '{parameter}' of tool '{tool}' \
         (available context keys: {})",
        .available_context_keys.join(", ")
    )]
    Gap {
        tool: String,
        parameter: String,
        available_context_keys: Vec<String>,
    },

    /// A semantic class name in a rule table did not parse.
    #[error("Unknown semantic class in resolution rules: {0}")]
    UnknownSemanticClass(String),
}

#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// Resolved values are present but fail the per-category content rules.
    /// Execution is blocked; the tool is never invoked.
    #[error(
        "Tool '{tool}' blocked before execution: parameter(s) [{}] failed content rules \
         (available context keys: {})",
        .parameters.join(", "),
        .available_context_keys.join(", ")
    )]
    Blocked {
        tool: String,
        parameters: Vec<String>,
        available_context_keys: Vec<String>,
    },
}

#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    #[error(
        "Total budget exceeded: charge of ${requested:.4} would bring spend to \
         ${:.4}, over the ${limit:.4} limit",
        .spent + .requested
    )]
    TotalExceeded {
        requested: f64,
        spent: f64,
        limit: f64,
    },

    #[error(
        "Task budget exceeded for '{task}': charge of ${requested:.4} would bring task \
         spend to ${:.4}, over the ${limit:.4} limit",
        .spent + .requested
    )]
    TaskExceeded {
        task: String,
        requested: f64,
        spent: f64,
        limit: f64,
    },

    #[error("Invalid charge amount: {0}")]
    InvalidAmount(f64),

    #[error("Unknown budget tier: {0}")]
    UnknownTier(String),
}

#[derive(Debug, Clone, Error)]
pub enum BreakerError {
    /// The resource's circuit is open; the call was rejected without
    /// attempting the underlying operation.
    #[error("Circuit open for resource '{resource}', retry in {retry_after_ms}ms")]
    Open {
        resource: String,
        retry_after_ms: u64,
    },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
