//! Tool contract — the abstraction over pipeline capabilities.
//!
//! A tool is a callable capability with a declared parameter surface, a
//! category (which selects its validation rules), and a single structured
//! outcome. The governance layers (resolution, validation, budget, breaker)
//! only ever see this contract; concrete tool implementations live with
//! their owners outside the engine.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Final call arguments, keyed by parameter name.
///
/// A `BTreeMap` so that resolution output and serialized reports are
/// byte-identical for identical inputs.
pub type ArgMap = BTreeMap<String, Value>;

/// The semantic class of a parameter, used to look up candidate context
/// keys during resolution and content rules during validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SemanticClass {
    Text,
    Identifier,
    Url,
    Metadata,
    None,
}

impl SemanticClass {
    /// Parse a class name as it appears in rule tables and config files.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "identifier" => Some(Self::Identifier),
            "url" => Some(Self::Url),
            "metadata" => Some(Self::Metadata),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for SemanticClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Identifier => "identifier",
            Self::Url => "url",
            Self::Metadata => "metadata",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// The validation category a tool belongs to.
///
/// Each category carries its own minimum-content rules (a bulk-extraction
/// tool needs more input text than a single-sentence classifier).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Operates on a unit of free text (sentiment, classification).
    Text,
    /// Extracts many items from a large body of text (claim extraction).
    BulkText,
    /// Operates on an identifier or path (lookups, graph reads).
    Identifier,
    /// Fetches an external resource by URL (download, archive).
    Acquisition,
    /// No content-sensitive inputs (housekeeping, notifications).
    General,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::BulkText => "bulk_text",
            Self::Identifier => "identifier",
            Self::Acquisition => "acquisition",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameterSpec {
    /// Parameter name as the tool expects it.
    pub name: String,

    /// Whether the call must not proceed without a meaningful value.
    pub required: bool,

    /// Drives resolution fallback and validation content rules.
    pub semantic_class: SemanticClass,

    /// Applied when nothing else supplied a value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameterSpec {
    /// A required parameter with no default.
    pub fn required(name: impl Into<String>, class: SemanticClass) -> Self {
        Self {
            name: name.into(),
            required: true,
            semantic_class: class,
            default: None,
        }
    }

    /// An optional parameter with no default.
    pub fn optional(name: impl Into<String>, class: SemanticClass) -> Self {
        Self {
            name: name.into(),
            required: false,
            semantic_class: class,
            default: None,
        }
    }

    /// Attach a default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A tool's declared parameter surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSurface {
    /// Declared parameters, in declaration order.
    pub parameters: Vec<ToolParameterSpec>,

    /// Whether undeclared argument keys are passed through. Context-only
    /// keys are stripped regardless of this flag.
    pub accepts_arbitrary_extra: bool,
}

impl ToolSurface {
    pub fn new(parameters: Vec<ToolParameterSpec>) -> Self {
        Self {
            parameters,
            accepts_arbitrary_extra: false,
        }
    }

    pub fn with_arbitrary_extra(mut self) -> Self {
        self.accepts_arbitrary_extra = true;
        self
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ToolParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Whether `name` is declared.
    pub fn declares(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }
}

/// The single structured outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and produced structured output for the context store.
    Success { data: ArgMap },

    /// The tool ran and failed in its own domain.
    Failure { reason: String, metadata: ArgMap },

    /// The tool declined to run (precondition not met on its side).
    Skipped { reason: String },
}

impl ToolOutcome {
    pub fn success(data: ArgMap) -> Self {
        Self::Success { data }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            metadata: ArgMap::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// The core Tool trait.
///
/// Implemented by external tool collaborators (download, transcription,
/// sentiment, fact-checking, graph storage). The engine resolves and
/// validates against `surface()`/`category()` before ever calling
/// `invoke()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "transcribe", "fact_check").
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// The validation category this tool belongs to.
    fn category(&self) -> ToolCategory;

    /// The declared parameter surface.
    fn surface(&self) -> ToolSurface;

    /// The external resource this tool calls out to, if any
    /// (e.g., a hostname). Guarded by the circuit breaker registry.
    fn resource(&self) -> Option<&str> {
        None
    }

    /// Execute the tool with fully resolved, validated arguments.
    async fn invoke(&self, args: ArgMap) -> std::result::Result<ToolOutcome, ToolError>;
}

/// A registry of available tools.
///
/// The engine uses this to look up a tool's surface and category for
/// resolution/validation, and to dispatch the invocation itself.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get a tool's declared surface by name.
    pub fn surface(&self, name: &str) -> Option<ToolSurface> {
        self.get(name).map(|t| t.surface())
    }

    /// Get a tool's category by name.
    pub fn category(&self, name: &str) -> Option<ToolCategory> {
        self.get(name).map(|t| t.category())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
