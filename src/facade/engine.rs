use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bridge::CapabilityBridge;
use crate::core::{
    EngineError, ExecutionResult, InvocationContext, Result, ScriptDefinition,
};
use crate::limits::{LimitPolicy, SessionLimits};
use crate::recorder::{AuditSink, ExecutionRecorder};
use crate::registry::ScriptRegistry;
use crate::session::IsolateSession;
use crate::store::PlayerStateStore;

/// The script execution engine.
///
/// Every invocation builds its own disposable sandbox; the engine holds no
/// isolate pool and no per-session state, so concurrent invocations are
/// fully independent.
///
/// # Examples
///
/// ```ignore
/// use scriptbox::{
///     InMemoryAuditSink, InMemoryPlayerStore, InMemoryScriptRegistry, InvocationContext,
///     ScriptDefinition, ScriptEngine,
/// };
/// use std::sync::Arc;
///
/// let registry = Arc::new(InMemoryScriptRegistry::new());
/// let store = Arc::new(InMemoryPlayerStore::new());
/// let audit = Arc::new(InMemoryAuditSink::new());
/// let engine = ScriptEngine::new(registry.clone(), store.clone(), audit);
///
/// store.add_player("P1", "Alice").await;
/// registry
///     .store(ScriptDefinition::new(
///         "T1",
///         "grantDaily",
///         "handlers.grantDaily = async (args, { server }) => {
///              await server.addVirtualCurrency('GOLD', 10);
///              return { granted: 10 };
///          };",
///     ))
///     .await;
///
/// let context = InvocationContext::new("T1", "grantDaily").player("P1");
/// let result = engine.execute_function(context, false).await?;
/// assert!(result.success);
/// ```
pub struct ScriptEngine {
    registry: Arc<dyn ScriptRegistry>,
    store: Arc<dyn PlayerStateStore>,
    recorder: ExecutionRecorder,
    policy: LimitPolicy,
    stats: EngineStats,
}

impl ScriptEngine {
    /// Create an engine over the three collaborators, with default limits.
    pub fn new(
        registry: Arc<dyn ScriptRegistry>,
        store: Arc<dyn PlayerStateStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            store,
            recorder: ExecutionRecorder::new(audit),
            policy: LimitPolicy::new(),
            stats: EngineStats::default(),
        }
    }

    /// Replace the platform limit policy.
    pub fn with_policy(mut self, policy: LimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute a definition inside a fresh sandbox.
    ///
    /// Returns only after a terminal state. Guest failures and timeouts are
    /// reported inside the [`ExecutionResult`]; an `Err` means the engine
    /// itself could not run the invocation.
    pub async fn execute(
        &self,
        definition: ScriptDefinition,
        context: InvocationContext,
    ) -> Result<ExecutionResult> {
        if definition.source_code.len() > self.policy.max_source_bytes {
            return Err(EngineError::SourceTooLarge {
                max: self.policy.max_source_bytes,
                actual: definition.source_code.len(),
            });
        }

        tracing::info!(
            title = %definition.title_id,
            function = %definition.function_name,
            version = definition.version,
            "executing script function"
        );

        let limits = SessionLimits::resolve(&definition, &self.policy);
        let bridge = Arc::new(CapabilityBridge::new(
            Arc::clone(&self.store),
            &context,
            &self.policy,
        ));
        let session = IsolateSession::new(definition, context.clone(), limits, bridge);

        self.stats.sessions_started.fetch_add(1, Ordering::SeqCst);
        let outcome = session.run().await;
        // The sandbox is scope-bound to its thread: by the time run()
        // returns, on success or failure, it no longer exists.
        self.stats.sessions_disposed.fetch_add(1, Ordering::SeqCst);
        let report = outcome?;

        let result = self.recorder.record(&context, report).await;
        tracing::info!(
            title = %context.title_id,
            function = %context.function_name,
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "script function finished"
        );
        Ok(result)
    }

    /// Resolve a function through the registry and execute it.
    ///
    /// With `require_published` set, only published definitions run;
    /// without it the latest revision runs (developer test calls).
    pub async fn execute_function(
        &self,
        context: InvocationContext,
        require_published: bool,
    ) -> Result<ExecutionResult> {
        let definition = self
            .registry
            .lookup(&context.title_id, &context.function_name, require_published)
            .await?
            .ok_or_else(|| {
                EngineError::FunctionNotFound(
                    context.title_id.clone(),
                    context.function_name.clone(),
                )
            })?;

        self.execute(definition, context).await
    }

    /// Engine counters snapshot.
    pub fn stats(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            sessions_started: self.stats.sessions_started.load(Ordering::SeqCst),
            sessions_disposed: self.stats.sessions_disposed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct EngineStats {
    sessions_started: AtomicU64,
    sessions_disposed: AtomicU64,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy)]
pub struct EngineStatsSnapshot {
    pub sessions_started: u64,
    pub sessions_disposed: u64,
}

impl std::fmt::Display for EngineStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine Stats: {} sessions started, {} disposed",
            self.sessions_started, self.sessions_disposed
        )
    }
}
