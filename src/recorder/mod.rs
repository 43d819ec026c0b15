use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::{ExecutionRecord, ExecutionResult, InvocationContext};
use crate::session::{SessionOutcome, SessionReport};

/// Audit collaborator; one append per invocation, retention is its policy.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: ExecutionRecord) -> anyhow::Result<()>;
}

/// Turns a terminal session report into the caller-facing result and writes
/// the audit record.
///
/// Audit persistence is best-effort: a failure to persist never fails the
/// invocation, it is only logged locally.
pub struct ExecutionRecorder {
    sink: Arc<dyn AuditSink>,
}

impl ExecutionRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Shape a session report into an [`ExecutionResult`].
    pub fn build_result(report: SessionReport) -> ExecutionResult {
        let execution_time_ms = report.execution_time.as_millis() as u64;
        match report.outcome {
            SessionOutcome::Completed(value) => ExecutionResult {
                success: true,
                result: Some(value),
                error: None,
                execution_time_ms,
                logs: report.logs,
            },
            SessionOutcome::Failed(message) => ExecutionResult {
                success: false,
                result: None,
                error: Some(message),
                execution_time_ms,
                logs: report.logs,
            },
            SessionOutcome::TimedOut => ExecutionResult {
                success: false,
                result: None,
                error: Some(format!(
                    "script execution timed out after {execution_time_ms} ms"
                )),
                execution_time_ms,
                logs: report.logs,
            },
        }
    }

    /// Build the result and append the matching audit record.
    pub async fn record(
        &self,
        context: &InvocationContext,
        report: SessionReport,
    ) -> ExecutionResult {
        let result = Self::build_result(report);

        let record = ExecutionRecord {
            title_id: context.title_id.clone(),
            function_name: context.function_name.clone(),
            player_id: context.player_id.clone(),
            args: context.args.clone(),
            result: result.result.clone(),
            error: result.error.clone(),
            execution_time_ms: result.execution_time_ms,
            created_at: Utc::now(),
        };

        if let Err(err) = self.sink.append(record).await {
            tracing::warn!(
                title = %context.title_id,
                function = %context.function_name,
                error = %err,
                "failed to persist execution record"
            );
        }

        result
    }
}

/// In-memory audit sink for tests and single-process embeddings.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: ExecutionRecord) -> anyhow::Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}
