use async_trait::async_trait;
use thiserror::Error;

use common::{AutoTestResult, GradePayload};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink rejected record: {0}")]
    Rejected(String),

    #[error("Sink transport error: {0}")]
    Transport(String),
}

/// Receives completed grading results for storage.
///
/// Delivery is at-least-once; the implementation de-duplicates.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save_result(&self, result: &AutoTestResult) -> Result<(), SinkError>;
}

/// Receives the partial grade emitted right after a container run.
#[async_trait]
pub trait GradeSink: Send + Sync {
    async fn send_grade(&self, grade: &GradePayload) -> Result<(), SinkError>;
}

/// Extension seam invoked by the dispatcher after a result is stored,
/// before the slot is freed. Used by host processes for feedback posting.
/// Errors are swallowed so a broken observer cannot wedge the queues.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn process_execution(&self, result: &AutoTestResult) -> anyhow::Result<()>;
}

/// Observer that does nothing.
pub struct NullObserver;

#[async_trait]
impl ExecutionObserver for NullObserver {
    async fn process_execution(&self, _result: &AutoTestResult) -> anyhow::Result<()> {
        Ok(())
    }
}
