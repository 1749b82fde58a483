use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    /// Request rejected for a reason the student can act on. The message
    /// is shown verbatim.
    #[error("{0}")]
    Validation(String),

    /// Local records are in a state provisioning expected to be impossible.
    /// A bug signal: the call fails without rollback so concurrent state is
    /// not clobbered.
    #[error("Conflicting records: {0}")]
    Consistency(String),

    /// The source-hosting platform reported or caused a failure. The caller
    /// may resubmit.
    #[error("Source hosting error: {0}")]
    Hosting(String),

    #[error("Persistence error: {0}")]
    Store(String),
}

impl PortalError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;
