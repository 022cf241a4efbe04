//! # Toolgate Core
//!
//! Domain types, traits, and error definitions for the Toolgate invocation
//! governance engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The tool contract and the meaningfulness classifier are defined here as
//! traits and pure functions. Implementations (context store, resolver,
//! validator, ledger, breaker) live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod meaning;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{
    BreakerError, BudgetError, Error, ResolutionError, Result, ToolError, ValidationError,
};
pub use meaning::{MeaningPolicy, is_critical, is_meaningful};
pub use tool::{
    ArgMap, SemanticClass, Tool, ToolCategory, ToolOutcome, ToolParameterSpec, ToolRegistry,
    ToolSurface,
};
