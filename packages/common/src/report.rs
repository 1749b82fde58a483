use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commit::{ContainerInput, ExecutionKey};

/// How a grading container run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container exited cleanly and produced a report.
    Success,
    /// Container exited non-zero or failed to start.
    Fail,
    /// Container exceeded the deliverable's wall-clock timeout.
    Timeout,
    /// Container exited but the report was missing or unparseable.
    Invalid,
}

/// The structured report a grading container leaves in its output directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GradeReport {
    /// Overall grade for the commit, 0-100. Absent when grading could not
    /// produce a score (build failure, malformed submission).
    pub score_overall: Option<f64>,
    /// Score from the functional test suite, if reported separately.
    pub score_test: Option<f64>,
    /// Coverage score, if reported separately.
    pub score_cover: Option<f64>,
    /// Names of passing tests.
    #[serde(default)]
    pub passes: Vec<String>,
    /// Names of failing tests.
    #[serde(default)]
    pub failures: Vec<String>,
    /// Human-readable feedback rendered into the postback comment.
    pub feedback: Option<String>,
    /// Grader-specific extras the core passes through untouched.
    #[serde(default)]
    pub custom: serde_json::Value,
}

/// Everything the container run produced, report included.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerOutput {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// The collected report. None for Fail/Timeout/Invalid runs.
    pub report: Option<GradeReport>,
    /// How the run ended.
    pub state: ContainerState,
    /// Container stdout tail, kept for staff-side debugging.
    pub stdio: Option<String>,
}

impl ContainerOutput {
    /// An output recording a run that never produced a usable report.
    pub fn errored(state: ContainerState, stdio: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            report: None,
            state,
            stdio,
        }
    }
}

/// The record a grading job builds and hands to the dispatcher on completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoTestResult {
    pub commit_sha: String,
    pub commit_url: String,
    pub deliv_id: String,
    pub repo_id: String,
    /// The input the job was scheduled with, echoed back for the sink.
    pub input: ContainerInput,
    pub output: ContainerOutput,
}

impl AutoTestResult {
    /// Build a result shell from the input; the job fills in `output`.
    pub fn from_input(input: ContainerInput, output: ContainerOutput) -> Self {
        Self {
            commit_sha: input.target.commit_sha.clone(),
            commit_url: input.target.commit_url.clone(),
            deliv_id: input.target.deliv_id.clone(),
            repo_id: input.target.repo_id.clone(),
            input,
            output,
        }
    }

    /// The at-most-once identity this result frees on completion.
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(self.commit_url.clone(), self.deliv_id.clone())
    }

    /// The dispatcher drops results missing their required identity fields;
    /// a record failing this check cannot be matched to a running slot.
    pub fn is_well_formed(&self) -> bool {
        !self.commit_sha.is_empty() && !self.commit_url.is_empty() && !self.deliv_id.is_empty()
    }

    /// The overall score, when the run produced one.
    pub fn score(&self) -> Option<f64> {
        self.output.report.as_ref().and_then(|r| r.score_overall)
    }
}

/// Transport record for the grade sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradePayload {
    pub deliv_id: String,
    pub repo_id: String,
    pub repo_url: String,
    /// Overall score; `None` when the run produced no grade.
    pub score: Option<f64>,
    /// Display name for the link (usually the short commit SHA).
    pub url_name: String,
    /// Link target (the commit URL).
    pub url: String,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitTarget, DeliverableParams, PostbackTarget};

    fn input() -> ContainerInput {
        ContainerInput {
            target: CommitTarget {
                commit_sha: "abc123".into(),
                commit_url: "https://git.example.com/org/repo/commit/abc123".into(),
                repo_id: "repo".into(),
                deliv_id: "d1".into(),
                postback: PostbackTarget::Suppressed,
                timestamp: Utc::now(),
            },
            params: DeliverableParams {
                image: "grader/d1:latest".into(),
                timeout_secs: 300,
            },
        }
    }

    #[test]
    fn test_result_echoes_input_identity() {
        let result = AutoTestResult::from_input(
            input(),
            ContainerOutput::errored(ContainerState::Fail, None),
        );
        assert_eq!(result.commit_sha, "abc123");
        assert_eq!(result.deliv_id, "d1");
        assert!(result.is_well_formed());
        assert_eq!(result.score(), None);
    }

    #[test]
    fn test_malformed_result_detected() {
        let mut result = AutoTestResult::from_input(
            input(),
            ContainerOutput::errored(ContainerState::Invalid, None),
        );
        result.commit_url.clear();
        assert!(!result.is_well_formed());
    }
}
