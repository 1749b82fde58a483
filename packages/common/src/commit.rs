use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where feedback for a graded commit should be delivered.
///
/// The wire format uses two sentinel strings instead of a URL for test
/// submissions; they are kept as tagged variants with a canonical
/// serialization so the rest of the system never string-compares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostbackTarget {
    /// Post the formatted report to this URL (a commit comment endpoint).
    Url(String),
    /// Drop the report entirely. Wire form: `EMPTY`.
    Suppressed,
    /// Record the report but do not deliver it. Wire form: `POSTBACK`.
    CaptureOnly,
}

impl PostbackTarget {
    /// Parse the wire representation, treating the two sentinels specially.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "EMPTY" => Self::Suppressed,
            "POSTBACK" => Self::CaptureOnly,
            url => Self::Url(url.to_string()),
        }
    }

    /// The wire representation.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Suppressed => "EMPTY",
            Self::CaptureOnly => "POSTBACK",
        }
    }

    /// Test submissions skip the container runtime entirely.
    pub fn is_test_mode(&self) -> bool {
        matches!(self, Self::Suppressed | Self::CaptureOnly)
    }
}

/// One unit of grading work: a commit of a repository against a deliverable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitTarget {
    /// Commit hash. Opaque; only echoed back in results.
    pub commit_sha: String,
    /// Canonical URL of the commit. Unique key within the dispatcher.
    pub commit_url: String,
    /// Repository the commit belongs to.
    pub repo_id: String,
    /// Deliverable to grade against (e.g. "d1").
    pub deliv_id: String,
    /// Where the formatted feedback goes.
    pub postback: PostbackTarget,
    /// When the commit was submitted. Used for wait-time metrics.
    pub timestamp: DateTime<Utc>,
}

/// Per-deliverable container parameters attached to a commit at enqueue time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliverableParams {
    /// Container image reference used to grade this deliverable.
    pub image: String,
    /// Wall-clock grading timeout in seconds.
    pub timeout_secs: u64,
}

/// What the job queues store: a commit target plus the parameters the
/// grading container needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerInput {
    pub target: CommitTarget,
    pub params: DeliverableParams,
}

impl ContainerInput {
    /// The at-most-once identity of this work item.
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey {
            commit_url: self.target.commit_url.clone(),
            deliv_id: self.target.deliv_id.clone(),
        }
    }
}

/// Identity of a grading execution. A given key is admitted at most once
/// across all queues, waiting or running.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub commit_url: String,
    pub deliv_id: String,
}

impl ExecutionKey {
    pub fn new(commit_url: impl Into<String>, deliv_id: impl Into<String>) -> Self {
        Self {
            commit_url: commit_url.into(),
            deliv_id: deliv_id.into(),
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.commit_url, self.deliv_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postback_sentinels() {
        assert_eq!(PostbackTarget::from_wire("EMPTY"), PostbackTarget::Suppressed);
        assert_eq!(
            PostbackTarget::from_wire("POSTBACK"),
            PostbackTarget::CaptureOnly
        );
        assert!(PostbackTarget::from_wire("EMPTY").is_test_mode());
        assert!(!PostbackTarget::from_wire("https://example.com/x").is_test_mode());
        assert_eq!(
            PostbackTarget::from_wire("https://example.com/x").as_wire(),
            "https://example.com/x"
        );
    }
}
