use std::time::Duration;

use crate::core::ScriptDefinition;

/// Smallest heap a session may run with. V8 needs a workable heap even for
/// the bootstrap script, so declarations below this are raised to it.
pub const MIN_MEMORY_MB: u64 = 16;

/// Smallest wall-clock budget a session may run with.
pub const MIN_TIMEOUT_SECONDS: u64 = 1;

/// Platform-wide execution ceilings and per-invocation guards.
///
/// Tenant-declared limits are advisory inputs; the policy's ceilings apply
/// regardless of what a tenant configured, so no title can request
/// unbounded resources.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    /// Hard ceiling on the wall-clock budget of one invocation.
    pub max_timeout_seconds: u64,

    /// Hard ceiling on the heap budget of one sandbox.
    pub max_memory_mb: u64,

    /// Budget applied when a definition declares no timeout.
    pub default_timeout_seconds: u64,

    /// Heap applied when a definition declares no memory limit.
    pub default_memory_mb: u64,

    /// Largest accepted script source.
    pub max_source_bytes: usize,

    /// Largest accepted return value, measured serialized.
    pub max_result_bytes: usize,

    /// Data-operation calls allowed per invocation.
    pub max_bridge_calls: usize,

    /// Log entries retained per invocation; overflow is dropped and noted.
    pub max_log_entries: usize,

    /// Longest retained log message; longer messages are truncated.
    pub max_log_message_bytes: usize,
}

impl LimitPolicy {
    pub fn new() -> Self {
        Self {
            max_timeout_seconds: 30,
            max_memory_mb: 512,
            default_timeout_seconds: 10,
            default_memory_mb: 256,
            max_source_bytes: 512 * 1024,
            max_result_bytes: 1024 * 1024,
            max_bridge_calls: 100,
            max_log_entries: 256,
            max_log_message_bytes: 4 * 1024,
        }
    }

    pub fn max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn max_memory_mb(mut self, megabytes: u64) -> Self {
        self.max_memory_mb = megabytes;
        self
    }

    pub fn max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    pub fn max_result_bytes(mut self, bytes: usize) -> Self {
        self.max_result_bytes = bytes;
        self
    }

    pub fn max_bridge_calls(mut self, calls: usize) -> Self {
        self.max_bridge_calls = calls;
        self
    }

    pub fn max_log_entries(mut self, entries: usize) -> Self {
        self.max_log_entries = entries;
        self
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Enforceable budgets for one isolate session, resolved from a definition's
/// declared limits under a [`LimitPolicy`]. No side effects; consumed by the
/// session.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
    pub max_result_bytes: usize,
}

impl SessionLimits {
    /// Clamp a definition's declared limits into the policy's range.
    ///
    /// A declaration of zero means "not declared" and takes the policy
    /// default; anything else is clamped between the platform floor and
    /// ceiling.
    pub fn resolve(definition: &ScriptDefinition, policy: &LimitPolicy) -> Self {
        let timeout_seconds = if definition.timeout_seconds == 0 {
            policy.default_timeout_seconds
        } else {
            definition
                .timeout_seconds
                .clamp(MIN_TIMEOUT_SECONDS, policy.max_timeout_seconds)
        };

        let memory_mb = if definition.memory_limit_mb == 0 {
            policy.default_memory_mb
        } else {
            definition
                .memory_limit_mb
                .clamp(MIN_MEMORY_MB, policy.max_memory_mb)
        };

        Self {
            timeout: Duration::from_secs(timeout_seconds),
            memory_limit_bytes: (memory_mb as usize) * 1024 * 1024,
            max_result_bytes: policy.max_result_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(timeout: u64, memory: u64) -> ScriptDefinition {
        ScriptDefinition::new("T1", "f", "")
            .timeout_seconds(timeout)
            .memory_limit_mb(memory)
    }

    #[test]
    fn test_declared_limits_within_range_pass_through() {
        let limits = SessionLimits::resolve(&definition(5, 128), &LimitPolicy::new());
        assert_eq!(limits.timeout, Duration::from_secs(5));
        assert_eq!(limits.memory_limit_bytes, 128 * 1024 * 1024);
    }

    #[test]
    fn test_ceilings_apply_regardless_of_declaration() {
        let limits = SessionLimits::resolve(&definition(900, 4096), &LimitPolicy::new());
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert_eq!(limits.memory_limit_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn test_zero_declarations_take_defaults() {
        let limits = SessionLimits::resolve(&definition(0, 0), &LimitPolicy::new());
        assert_eq!(limits.timeout, Duration::from_secs(10));
        assert_eq!(limits.memory_limit_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_floor_applies_to_tiny_declarations() {
        let limits = SessionLimits::resolve(&definition(1, 1), &LimitPolicy::new());
        assert_eq!(limits.timeout, Duration::from_secs(1));
        assert_eq!(limits.memory_limit_bytes, (MIN_MEMORY_MB as usize) * 1024 * 1024);
    }

    #[test]
    fn test_custom_ceiling() {
        let policy = LimitPolicy::new().max_timeout_seconds(3);
        let limits = SessionLimits::resolve(&definition(10, 256), &policy);
        assert_eq!(limits.timeout, Duration::from_secs(3));
    }
}
