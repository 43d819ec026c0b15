pub mod error;
pub mod types;

pub use error::{BridgeError, EngineError, Result};
pub use types::{
    ExecutionRecord, ExecutionResult, InventoryEntry, InvocationContext, LogEntry, LogLevel,
    PlayerId, PlayerProfile, ScriptDefinition,
};
