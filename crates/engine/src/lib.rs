//! The invocation gate — the single path every tool call takes.
//!
//! For each call the gate runs, in order: tool lookup, a context snapshot,
//! parameter resolution, pre-execution validation, an atomic budget charge,
//! and a circuit breaker check. Only a call that clears every gate reaches
//! the tool; a rejection at any gate returns a structured error and the
//! tool is never invoked. Successful structured output is merged back into
//! the session context under the critical-key preservation rules, then
//! scanned for suspicious content.
//!
//! One [`WorkflowSession`] (context + budget ledger) lives per workflow
//! invocation. Breaker state deliberately outlives sessions: a resource
//! that failed during one workflow stays open for the next.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use serde::{Deserialize, Serialize};
use toolgate_breaker::{BreakerConfig, CircuitBreakerRegistry, Transition};
use toolgate_budget::{BudgetLedger, BudgetTier, LedgerSummary, TierTable};
use toolgate_config::GovernanceConfig;
use toolgate_context::ExecutionContext;
use toolgate_core::error::{BudgetError, Error, ToolError, ValidationError};
use toolgate_core::meaning::MeaningPolicy;
use toolgate_core::tool::{ArgMap, ToolCategory, ToolOutcome, ToolRegistry};
use toolgate_resolve::{FallbackHit, ResolutionRules, Resolver};
use toolgate_telemetry::{GovernanceMetrics, MetricsSnapshot};
use toolgate_validate::{CategoryRule, OutputFlag, ValidationRules, Validator};

/// One tool call as issued by a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Name of the registered tool to call.
    pub tool: String,

    /// Budget task bucket this call charges against (e.g. "analysis").
    pub task: String,

    /// Estimated cost of the call in USD, charged up front.
    pub estimated_cost: f64,

    /// Raw caller-supplied arguments, before resolution.
    pub arguments: ArgMap,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            task: task.into(),
            estimated_cost: 0.0,
            arguments: ArgMap::new(),
        }
    }

    pub fn with_cost(mut self, estimated_cost: f64) -> Self {
        self.estimated_cost = estimated_cost;
        self
    }

    pub fn with_arguments(mut self, arguments: ArgMap) -> Self {
        self.arguments = arguments;
        self
    }
}

/// What one governed call did, returned to the orchestrating stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReport {
    pub invocation_id: Uuid,
    pub tool: String,

    /// The tool's structured outcome (`Success` or `Skipped`; a `Failure`
    /// outcome surfaces as an error instead).
    pub outcome: ToolOutcome,

    /// Final argument keys the tool was called with.
    pub resolved_keys: Vec<String>,

    /// Which context keys satisfied which parameters via fallback.
    pub fallbacks: Vec<FallbackHit>,

    /// Output keys written into the session context.
    pub merged_keys: Vec<String>,

    /// Critical keys whose existing values survived a non-meaningful
    /// overwrite attempt from this tool's output.
    pub preserved_keys: Vec<String>,

    /// Non-blocking flags from the output scan.
    pub output_flags: Vec<OutputFlag>,

    /// Ledger state after this call's charge.
    pub budget: LedgerSummary,

    pub duration_ms: u64,
}

/// Per-workflow state: one execution context and one budget ledger.
///
/// Opened from [`InvocationGate::open_session`] at workflow start and
/// dropped at workflow end. Never shared across workflows.
pub struct WorkflowSession {
    id: Uuid,
    context: ExecutionContext,
    ledger: BudgetLedger,
}

impl WorkflowSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's execution context, for direct seeding and inspection.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The session's budget ledger.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Clear the context for a fresh run within the same session. The
    /// ledger keeps its spend; breaker state is gate-level and unaffected.
    pub fn reset_context(&self) {
        self.context.reset();
    }
}

/// The gate itself. Construct with [`InvocationGate::new`] plus `with_*`
/// overrides, or from a [`GovernanceConfig`] via
/// [`InvocationGate::from_config`].
pub struct InvocationGate {
    tools: Arc<ToolRegistry>,
    policy: Arc<MeaningPolicy>,
    resolver: Resolver,
    validator: Validator,
    tiers: TierTable,
    default_tier: String,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<GovernanceMetrics>,
}

impl InvocationGate {
    /// A gate over `tools` with every policy at its built-in default.
    pub fn new(tools: ToolRegistry) -> Self {
        let policy = Arc::new(MeaningPolicy::with_defaults());
        Self {
            tools: Arc::new(tools),
            resolver: Resolver::new(ResolutionRules::with_defaults(), policy.clone()),
            validator: Validator::new(ValidationRules::with_defaults(), policy.clone()),
            tiers: TierTable::with_defaults(),
            default_tier: "standard".to_string(),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            metrics: Arc::new(GovernanceMetrics::new()),
            policy,
        }
    }

    /// Build a gate from a loaded config.
    pub fn from_config(tools: ToolRegistry, config: &GovernanceConfig) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|e| Error::Config { message: e.to_string() })?;

        let mut gate = Self::new(tools).with_policy(config.meaning.to_policy());

        if !config.resolution.rules.is_empty() {
            let rules = ResolutionRules::from_map(config.resolution.version, &config.resolution.rules)?;
            gate = gate.with_resolution_rules(rules);
        }
        if let Some(keys) = config.resolution.context_only_set() {
            gate = gate.with_context_only_keys(keys);
        }

        let mut vrules = ValidationRules::with_defaults();
        vrules.set(
            ToolCategory::Text,
            CategoryRule { min_text_chars: config.validation.text_min_chars },
        );
        vrules.set(
            ToolCategory::BulkText,
            CategoryRule { min_text_chars: config.validation.bulk_text_min_chars },
        );
        gate = gate.with_validation_rules(vrules);

        if !config.budget.tiers.is_empty() {
            let mut table = TierTable::empty();
            for (name, section) in &config.budget.tiers {
                let mut tier = BudgetTier::new(name.clone(), section.total);
                for (task, limit) in &section.per_task {
                    tier = tier.with_task_limit(task.clone(), *limit);
                }
                table.set(tier);
            }
            gate = gate.with_tiers(table);
        }
        gate.default_tier = config.budget.default_tier.clone();

        gate = gate.with_breaker_config(BreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            cooldown: config.breaker.cooldown(),
            backoff_multiplier: config.breaker.backoff_multiplier,
            max_cooldown: config.breaker.max_cooldown(),
        });

        Ok(gate)
    }

    /// Replace the meaningfulness policy; the resolver and validator keep
    /// their rule tables. Apply before other `with_*` overrides.
    pub fn with_policy(mut self, policy: MeaningPolicy) -> Self {
        let policy = Arc::new(policy);
        self.resolver = Resolver::new(self.resolver.rules().clone(), policy.clone())
            .with_context_only_keys(self.resolver.context_only_keys().clone());
        self.validator = Validator::new(self.validator.rules().clone(), policy.clone());
        self.policy = policy;
        self
    }

    pub fn with_resolution_rules(mut self, rules: ResolutionRules) -> Self {
        self.resolver = Resolver::new(rules, self.policy.clone())
            .with_context_only_keys(self.resolver.context_only_keys().clone());
        self
    }

    pub fn with_context_only_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.resolver = Resolver::new(self.resolver.rules().clone(), self.policy.clone())
            .with_context_only_keys(keys);
        self
    }

    pub fn with_validation_rules(mut self, rules: ValidationRules) -> Self {
        self.validator = Validator::new(rules, self.policy.clone());
        self
    }

    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_default_tier(mut self, tier: impl Into<String>) -> Self {
        self.default_tier = tier.into();
        self
    }

    pub fn with_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breakers = Arc::new(CircuitBreakerRegistry::new(config));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernanceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Point-in-time copy of every governance counter.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open a session on the named budget tier.
    pub fn open_session(&self, tier_name: &str) -> Result<WorkflowSession, Error> {
        let ledger = self.tiers.open(tier_name)?;
        let session = WorkflowSession {
            id: Uuid::new_v4(),
            context: ExecutionContext::with_policy(self.policy.clone()),
            ledger,
        };
        info!(session_id = %session.id, tier = tier_name, "Workflow session opened");
        Ok(session)
    }

    /// Open a session on the configured default tier.
    pub fn open_default_session(&self) -> Result<WorkflowSession, Error> {
        self.open_session(&self.default_tier)
    }

    /// Run one tool call through every gate.
    ///
    /// Gate order: lookup, resolution, validation, budget, breaker. A
    /// rejection anywhere means the tool is never invoked; in particular a
    /// budget charge is only taken for calls that already passed validation.
    /// A `Failure` outcome from the tool itself surfaces as
    /// [`ToolError::ExecutionFailed`] after the breaker records it.
    pub async fn invoke(
        &self,
        session: &WorkflowSession,
        request: InvocationRequest,
    ) -> Result<InvocationReport, Error> {
        let started = Instant::now();
        let invocation_id = Uuid::new_v4();

        let tool = self
            .tools
            .get(&request.tool)
            .ok_or_else(|| Error::Tool(ToolError::NotFound(request.tool.clone())))?;
        let surface = tool.surface();
        let category = tool.category();

        let snapshot = session.context.snapshot();

        let resolved = self
            .resolver
            .resolve(&request.tool, &surface, &request.arguments, &snapshot)?;
        for hit in &resolved.fallbacks {
            self.metrics
                .record_resolution_fallback(&hit.parameter, &hit.source_key);
        }

        if let Err(err) = self.validator.validate(
            &request.tool,
            category,
            &surface,
            &resolved.args,
            snapshot.keys(),
        ) {
            let ValidationError::Blocked { parameters, .. } = &err;
            for parameter in parameters {
                self.metrics
                    .record_validation_rejection(&request.tool, parameter);
            }
            return Err(err.into());
        }

        if let Err(err) = session.ledger.charge(request.estimated_cost, &request.task) {
            if matches!(
                err,
                BudgetError::TotalExceeded { .. } | BudgetError::TaskExceeded { .. }
            ) {
                self.metrics.record_budget_rejection(&request.task);
            }
            return Err(err.into());
        }

        let resource = tool.resource().map(str::to_string);
        if let Some(resource) = &resource {
            let transition = self.breakers.try_acquire(resource)?;
            self.record_transition(transition);
        }

        info!(
            invocation_id = %invocation_id,
            session_id = %session.id,
            tool = %request.tool,
            task = %request.task,
            "Invoking tool"
        );

        let outcome = match tool.invoke(resolved.args.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(resource) = &resource {
                    let transition = self.breakers.record_failure(resource);
                    self.record_transition(transition);
                }
                return Err(err.into());
            }
        };

        let mut merged_keys = Vec::new();
        let mut preserved_keys = Vec::new();
        let mut output_flags = Vec::new();

        match &outcome {
            ToolOutcome::Failure { reason, .. } => {
                if let Some(resource) = &resource {
                    let transition = self.breakers.record_failure(resource);
                    self.record_transition(transition);
                }
                return Err(ToolError::ExecutionFailed {
                    tool_name: request.tool,
                    reason: reason.clone(),
                }
                .into());
            }
            ToolOutcome::Skipped { reason } => {
                // The tool declined before touching its resource; nothing to
                // merge, and the breaker only gets its trial slot back.
                if let Some(resource) = &resource {
                    let transition = self.breakers.record_skip(resource);
                    self.record_transition(transition);
                }
                info!(tool = %request.tool, reason = %reason, "Tool skipped");
            }
            ToolOutcome::Success { data } => {
                if let Some(resource) = &resource {
                    let transition = self.breakers.record_success(resource);
                    self.record_transition(transition);
                }

                output_flags = self.validator.scan_output(&request.tool, data);

                let report = session.context.merge(data.clone());
                self.metrics.record_merge(
                    report.inserted.len(),
                    report.overwritten.len(),
                    report.preserved_critical.len(),
                    report.ignored.len(),
                );
                merged_keys.extend(report.inserted);
                merged_keys.extend(report.overwritten);
                preserved_keys = report.preserved_critical;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            invocation_id = %invocation_id,
            tool = %request.tool,
            merged = merged_keys.len(),
            flags = output_flags.len(),
            duration_ms,
            "Invocation completed"
        );

        Ok(InvocationReport {
            invocation_id,
            tool: request.tool,
            outcome,
            resolved_keys: resolved.args.keys().cloned().collect(),
            fallbacks: resolved.fallbacks,
            merged_keys,
            preserved_keys,
            output_flags,
            budget: session.ledger.summary(),
            duration_ms,
        })
    }

    fn record_transition(&self, transition: Option<Transition>) {
        if let Some(t) = transition {
            self.metrics
                .record_breaker_transition(&t.resource, &t.to.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use toolgate_core::error::ResolutionError;
    use toolgate_core::tool::{SemanticClass, Tool, ToolParameterSpec, ToolSurface};

    const TRANSCRIPT: &str =
        "full five hundred word transcript of the podcast episode under analysis";

    fn args(pairs: &[(&str, Value)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Counts invocations and returns a canned outcome.
    struct SpyTool {
        name: &'static str,
        category: ToolCategory,
        surface: ToolSurface,
        resource: Option<&'static str>,
        calls: Arc<Mutex<u32>>,
        outcome: Box<dyn Fn(&ArgMap) -> Result<ToolOutcome, ToolError> + Send + Sync>,
    }

    impl SpyTool {
        fn calls(&self) -> Arc<Mutex<u32>> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl Tool for SpyTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn category(&self) -> ToolCategory {
            self.category
        }
        fn surface(&self) -> ToolSurface {
            self.surface.clone()
        }
        fn resource(&self) -> Option<&str> {
            self.resource
        }
        async fn invoke(&self, args: ArgMap) -> Result<ToolOutcome, ToolError> {
            *self.calls.lock().unwrap() += 1;
            (self.outcome)(&args)
        }
    }

    fn download_tool() -> SpyTool {
        SpyTool {
            name: "download",
            category: ToolCategory::Acquisition,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "url",
                SemanticClass::Url,
            )]),
            resource: Some("cdn.example.com"),
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|args| {
                let mut data = ArgMap::new();
                data.insert("file_path".into(), json!("/tmp/episode42.mp3"));
                data.insert("source_url".into(), args["url"].clone());
                Ok(ToolOutcome::success(data))
            }),
        }
    }

    fn transcribe_tool() -> SpyTool {
        SpyTool {
            name: "transcribe",
            category: ToolCategory::Identifier,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "file_path",
                SemanticClass::Identifier,
            )]),
            resource: None,
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| {
                let mut data = ArgMap::new();
                data.insert("transcript".into(), json!(TRANSCRIPT));
                Ok(ToolOutcome::success(data))
            }),
        }
    }

    fn sentiment_tool() -> SpyTool {
        SpyTool {
            name: "sentiment",
            category: ToolCategory::Text,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "text",
                SemanticClass::Text,
            )]),
            resource: None,
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| {
                let mut data = ArgMap::new();
                data.insert("sentiment".into(), json!("broadly positive"));
                Ok(ToolOutcome::success(data))
            }),
        }
    }

    fn claim_extraction_tool() -> SpyTool {
        SpyTool {
            name: "claim_extraction",
            category: ToolCategory::BulkText,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "text",
                SemanticClass::Text,
            )]),
            resource: None,
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| {
                let mut data = ArgMap::new();
                data.insert("claims".into(), json!(["the moon is made of rock"]));
                Ok(ToolOutcome::success(data))
            }),
        }
    }

    fn failing_download_tool() -> SpyTool {
        SpyTool {
            name: "download",
            category: ToolCategory::Acquisition,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "url",
                SemanticClass::Url,
            )]),
            resource: Some("cdn.example.com"),
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| {
                Err(ToolError::ExecutionFailed {
                    tool_name: "download".into(),
                    reason: "connection refused".into(),
                })
            }),
        }
    }

    fn gate(tools: Vec<SpyTool>) -> InvocationGate {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Box::new(tool));
        }
        InvocationGate::new(registry)
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let gate = gate(vec![]);
        let session = gate.open_default_session().unwrap();

        let err = gate
            .invoke(&session, InvocationRequest::new("nonexistent", "analysis"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn resolution_gap_blocks_before_invocation() {
        let tool = sentiment_tool();
        let calls = tool.calls();
        let gate = gate(vec![tool]);
        let session = gate.open_default_session().unwrap();

        let err = gate
            .invoke(&session, InvocationRequest::new("sentiment", "analysis"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::Gap { .. })
        ));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn validation_rejection_blocks_before_invocation() {
        let tool = claim_extraction_tool();
        let calls = tool.calls();
        let gate = gate(vec![tool]);
        let session = gate.open_default_session().unwrap();

        // Meaningful but well under the 50-char bulk-text minimum
        let request = InvocationRequest::new("claim_extraction", "analysis")
            .with_arguments(args(&[("text", json!("twenty characters ok"))]));
        let err = gate.invoke(&session, request).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(*calls.lock().unwrap(), 0);
        let snap = gate.metrics_snapshot();
        assert_eq!(snap.validation_rejections["claim_extraction :: text"], 1);
    }

    #[tokio::test]
    async fn budget_rejection_blocks_before_invocation() {
        let tool = sentiment_tool();
        let calls = tool.calls();
        let gate = gate(vec![tool]);
        let session = gate.open_session("quick").unwrap();

        let request = InvocationRequest::new("sentiment", "analysis")
            .with_cost(0.40)
            .with_arguments(args(&[("text", json!(TRANSCRIPT))]));
        let err = gate.invoke(&session, request).await.unwrap_err();

        assert!(matches!(err, Error::Budget(BudgetError::TaskExceeded { .. })));
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(gate.metrics_snapshot().budget_rejections["analysis"], 1);
        assert!((session.ledger().summary().total_spent - 0.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn pipeline_chains_through_context() {
        let gate = gate(vec![download_tool(), transcribe_tool(), sentiment_tool()]);
        let session = gate.open_default_session().unwrap();

        let report = gate
            .invoke(
                &session,
                InvocationRequest::new("download", "acquisition")
                    .with_cost(0.05)
                    .with_arguments(args(&[("url", json!("https://cdn.example.com/ep42.mp3"))])),
            )
            .await
            .unwrap();
        assert!(report.merged_keys.contains(&"file_path".to_string()));

        // transcribe finds file_path in the context by name, no caller args
        let report = gate
            .invoke(
                &session,
                InvocationRequest::new("transcribe", "acquisition").with_cost(0.05),
            )
            .await
            .unwrap();
        assert!(report.merged_keys.contains(&"transcript".to_string()));

        // sentiment's `text` parameter is satisfied from `transcript` via
        // the semantic-class fallback table
        let report = gate
            .invoke(
                &session,
                InvocationRequest::new("sentiment", "analysis").with_cost(0.10),
            )
            .await
            .unwrap();
        assert_eq!(
            report.fallbacks,
            vec![FallbackHit {
                parameter: "text".into(),
                source_key: "transcript".into()
            }]
        );
        assert!(report.merged_keys.contains(&"sentiment".to_string()));
        assert!((report.budget.total_spent - 0.20).abs() < 1e-9);

        let snap = gate.metrics_snapshot();
        assert_eq!(snap.resolution_fallbacks["text <- transcript"], 1);
        assert!(snap.merges.inserted >= 4);
    }

    #[tokio::test]
    async fn critical_output_downgrade_is_preserved_not_merged() {
        let bad_transcribe = SpyTool {
            name: "transcribe",
            category: ToolCategory::Identifier,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "file_path",
                SemanticClass::Identifier,
            )]),
            resource: None,
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| {
                let mut data = ArgMap::new();
                data.insert("transcript".into(), json!(""));
                Ok(ToolOutcome::success(data))
            }),
        };
        let gate = gate(vec![bad_transcribe]);
        let session = gate.open_default_session().unwrap();
        session
            .context()
            .merge([("transcript".to_string(), json!(TRANSCRIPT))]);
        session
            .context()
            .merge([("file_path".to_string(), json!("/tmp/episode42.mp3"))]);

        let report = gate
            .invoke(&session, InvocationRequest::new("transcribe", "acquisition"))
            .await
            .unwrap();

        assert_eq!(report.preserved_keys, vec!["transcript"]);
        assert!(report.merged_keys.is_empty());
        assert_eq!(
            session.context().snapshot().get("transcript"),
            Some(&json!(TRANSCRIPT))
        );
        // The empty transcript also shows up in the non-blocking output scan
        assert!(report.output_flags.iter().any(|f| f.field == "transcript"));
        assert_eq!(gate.metrics_snapshot().merges.critical_preserved, 1);
    }

    #[tokio::test]
    async fn skipped_outcome_merges_nothing() {
        let skipping = SpyTool {
            name: "archive",
            category: ToolCategory::Acquisition,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "url",
                SemanticClass::Url,
            )]),
            resource: Some("archive.example.org"),
            calls: Arc::new(Mutex::new(0)),
            outcome: Box::new(|_| Ok(ToolOutcome::skipped("already archived"))),
        };
        let gate = gate(vec![skipping]);
        let session = gate.open_default_session().unwrap();

        let report = gate
            .invoke(
                &session,
                InvocationRequest::new("archive", "acquisition")
                    .with_arguments(args(&[("url", json!("https://x.example/ep"))])),
            )
            .await
            .unwrap();

        assert!(matches!(report.outcome, ToolOutcome::Skipped { .. }));
        assert!(report.merged_keys.is_empty());
        assert!(session.context().is_empty());
    }

    #[tokio::test]
    async fn repeated_tool_failures_open_the_breaker() {
        let tool = failing_download_tool();
        let calls = tool.calls();
        let gate = gate(vec![tool]);
        let session = gate.open_default_session().unwrap();

        let request = || {
            InvocationRequest::new("download", "acquisition")
                .with_arguments(args(&[("url", json!("https://cdn.example.com/ep.mp3"))]))
        };

        for _ in 0..3 {
            let err = gate.invoke(&session, request()).await.unwrap_err();
            assert!(matches!(err, Error::Tool(ToolError::ExecutionFailed { .. })));
        }

        // Circuit now open: the fourth call is rejected without invocation
        let err = gate.invoke(&session, request()).await.unwrap_err();
        assert!(matches!(err, Error::Breaker(_)));
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            gate.metrics_snapshot().breaker_transitions["cdn.example.com -> open"],
            1
        );
    }

    #[tokio::test]
    async fn skipped_trial_call_does_not_wedge_the_breaker() {
        let calls = Arc::new(Mutex::new(0u32));
        let seq = calls.clone();
        let flaky_archive = SpyTool {
            name: "archive",
            category: ToolCategory::Acquisition,
            surface: ToolSurface::new(vec![ToolParameterSpec::required(
                "url",
                SemanticClass::Url,
            )]),
            resource: Some("archive.example.org"),
            calls: calls.clone(),
            // Three failures to open the circuit, then skips only
            outcome: Box::new(move |_| {
                if *seq.lock().unwrap() <= 3 {
                    Err(ToolError::ExecutionFailed {
                        tool_name: "archive".into(),
                        reason: "upstream timeout".into(),
                    })
                } else {
                    Ok(ToolOutcome::skipped("already archived"))
                }
            }),
        };

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(flaky_archive));
        let gate = InvocationGate::new(registry).with_breaker_config(BreakerConfig {
            failure_threshold: 3,
            cooldown: std::time::Duration::from_millis(50),
            backoff_multiplier: 2.0,
            max_cooldown: std::time::Duration::from_millis(100),
        });
        let session = gate.open_default_session().unwrap();
        let request = || {
            InvocationRequest::new("archive", "acquisition")
                .with_arguments(args(&[("url", json!("https://x.example/ep"))]))
        };

        for _ in 0..3 {
            let _ = gate.invoke(&session, request()).await.unwrap_err();
        }

        // Trial call after the cooldown skips; the slot must be released
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let report = gate.invoke(&session, request()).await.unwrap();
        assert!(matches!(report.outcome, ToolOutcome::Skipped { .. }));

        // The next cooldown expiry admits another trial instead of
        // rejecting the resource forever
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let report = gate.invoke(&session, request()).await.unwrap();
        assert!(matches!(report.outcome, ToolOutcome::Skipped { .. }));
        assert_eq!(*calls.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn breaker_state_outlives_sessions() {
        let gate = gate(vec![failing_download_tool()]);
        let request = || {
            InvocationRequest::new("download", "acquisition")
                .with_arguments(args(&[("url", json!("https://cdn.example.com/ep.mp3"))]))
        };

        let session = gate.open_default_session().unwrap();
        for _ in 0..3 {
            let _ = gate.invoke(&session, request()).await.unwrap_err();
        }
        drop(session);

        let fresh = gate.open_default_session().unwrap();
        let err = gate.invoke(&fresh, request()).await.unwrap_err();
        assert!(matches!(err, Error::Breaker(_)));

        gate.breakers().reset("cdn.example.com");
        let err = gate.invoke(&fresh, request()).await.unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn sessions_do_not_share_context_or_budget() {
        let gate = gate(vec![sentiment_tool()]);
        let a = gate.open_session("quick").unwrap();
        let b = gate.open_session("quick").unwrap();

        a.context()
            .merge([("transcript".to_string(), json!(TRANSCRIPT))]);
        assert!(b.context().is_empty());

        a.ledger().charge(0.30, "analysis").unwrap();
        assert!((b.ledger().summary().total_spent - 0.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn from_config_applies_overrides() {
        let config = GovernanceConfig::from_toml(
            r#"
            [validation]
            bulk_text_min_chars = 10

            [budget]
            default_tier = "tiny"

            [budget.tiers.tiny]
            total = 0.10
        "#,
        )
        .unwrap();

        let tool = claim_extraction_tool();
        let calls = tool.calls();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(tool));
        let gate = InvocationGate::from_config(registry, &config).unwrap();
        let session = gate.open_default_session().unwrap();

        // 20 chars clears the lowered bulk-text minimum
        let report = gate
            .invoke(
                &session,
                InvocationRequest::new("claim_extraction", "analysis")
                    .with_cost(0.05)
                    .with_arguments(args(&[("text", json!("twenty characters ok"))])),
            )
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(report.budget.tier, "tiny");

        // And the tiny tier's total limit still binds
        let err = gate
            .invoke(
                &session,
                InvocationRequest::new("claim_extraction", "analysis")
                    .with_cost(0.08)
                    .with_arguments(args(&[("text", json!("twenty characters ok"))])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Budget(BudgetError::TotalExceeded { .. })));
    }
}
