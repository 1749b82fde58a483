use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum AutotestError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Workspace error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container runtime error: {0}")]
    Docker(String),

    #[error("Checkout failed: {0}")]
    Checkout(String),

    #[error("Malformed report: {0}")]
    Report(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutotestError>;
