use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Platform-wide player identifier.
pub type PlayerId = String;

/// A developer-authored script function, as handed over by the registry.
///
/// Immutable once loaded into a session. The registry owns storage,
/// versioning and publication; the engine only reads the definition and
/// clamps its declared limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDefinition {
    pub title_id: String,
    /// Unique per title.
    pub function_name: String,
    pub source_code: String,
    /// Monotonic, incremented by the registry on every update.
    pub version: u32,
    pub published: bool,
    /// Declared wall-clock budget, clamped by the engine to the platform ceiling.
    pub timeout_seconds: u64,
    /// Declared heap budget, clamped by the engine to the platform ceiling.
    pub memory_limit_mb: u64,
}

impl ScriptDefinition {
    pub fn new(
        title_id: impl Into<String>,
        function_name: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            title_id: title_id.into(),
            function_name: function_name.into(),
            source_code: source_code.into(),
            version: 1,
            published: false,
            timeout_seconds: 10,
            memory_limit_mb: 256,
        }
    }

    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn memory_limit_mb(mut self, megabytes: u64) -> Self {
        self.memory_limit_mb = megabytes;
        self
    }
}

/// Per-call identity and argument bundle.
///
/// Consumed by exactly one isolate session, never persisted, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub title_id: String,
    /// Absent for developer test calls made without a player identity.
    pub player_id: Option<PlayerId>,
    pub function_name: String,
    pub args: Value,
}

impl InvocationContext {
    pub fn new(title_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            title_id: title_id.into(),
            player_id: None,
            function_name: function_name.into(),
            args: Value::Object(Default::default()),
        }
    }

    pub fn player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

/// Severity of a guest log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of the invocation's ordered log buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// The outcome of one invocation, produced exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub logs: Vec<LogEntry>,
}

/// Append-only audit row, one per invocation.
///
/// Retention and expiry are the audit collaborator's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub title_id: String,
    pub function_name: String,
    pub player_id: Option<PlayerId>,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Read-only projection of a player handed to guest code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub player_id: PlayerId,
    pub display_name: String,
    pub level: u32,
    pub experience: u64,
    pub custom_data: Value,
    pub statistics: BTreeMap<String, i64>,
}

/// One granted item instance in a player's inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub item_id: String,
    pub instance_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_version: Option<u32>,
    pub granted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_builder() {
        let def = ScriptDefinition::new("T1", "grantDaily", "handlers.grantDaily = () => 1;")
            .published()
            .timeout_seconds(5)
            .memory_limit_mb(128);

        assert_eq!(def.version, 1);
        assert!(def.published);
        assert_eq!(def.timeout_seconds, 5);
        assert_eq!(def.memory_limit_mb, 128);
    }

    #[test]
    fn test_context_defaults_to_empty_args() {
        let ctx = InvocationContext::new("T1", "grantDaily");
        assert!(ctx.player_id.is_none());
        assert_eq!(ctx.args, json!({}));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = ExecutionResult {
            success: true,
            result: Some(json!({"granted": 10})),
            error: None,
            execution_time_ms: 3,
            logs: vec![LogEntry::new(LogLevel::Info, "done")],
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["executionTimeMs"], 3);
        assert_eq!(value["logs"][0]["level"], "info");
        assert!(value.get("error").is_none());
    }
}
