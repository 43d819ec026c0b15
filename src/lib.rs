// ============================================================================
// scriptbox Library
// ============================================================================
//
// Sandboxed script execution engine for a multi-tenant game backend: runs
// developer-supplied, per-title JavaScript functions on behalf of players in
// disposable V8 isolates, under hard wall-clock and memory caps, with a
// capability-scoped bridge as the only way into platform player state.

pub mod core;
pub mod limits;
pub mod registry;
pub mod store;
pub mod bridge;
pub mod session;
pub mod recorder;
pub mod facade;

// Re-export main types for convenience
pub use crate::core::{
    BridgeError, EngineError, ExecutionRecord, ExecutionResult, InventoryEntry, InvocationContext,
    LogEntry, LogLevel, PlayerId, PlayerProfile, Result, ScriptDefinition,
};
pub use bridge::CapabilityBridge;
pub use facade::{EngineStatsSnapshot, ScriptEngine};
pub use limits::{LimitPolicy, SessionLimits};
pub use recorder::{AuditSink, ExecutionRecorder, InMemoryAuditSink};
pub use registry::{InMemoryScriptRegistry, ScriptRegistry};
pub use session::{IsolateSession, SessionOutcome, SessionReport, SessionState};
pub use store::{InMemoryPlayerStore, PlayerStateStore};
