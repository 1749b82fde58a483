use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::status::CourseStatus;

/// Score recorded for a deliverable that has been provisioned but not yet
/// graded. Real grades are always >= 0.
pub const PLACEHOLDER_SCORE: f64 = -1.0;

/// What kind of account a person record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonKind {
    Student,
    Staff,
}

/// A registered course participant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Person {
    /// Stable internal id (also the default team/repo naming seed).
    pub id: String,
    /// Account name on the source-hosting platform.
    pub github_id: String,
    pub kind: PersonKind,
    /// Cached progression status. Best-effort; the raw facts (repos, teams,
    /// grades) are authoritative and the cache never regresses.
    pub status: CourseStatus,
    /// Forward-compatible fields the core does not interpret.
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl Person {
    /// A newly sighted person starts at the bottom of the progression.
    pub fn new(id: impl Into<String>, github_id: impl Into<String>, kind: PersonKind) -> Self {
        Self {
            id: id.into(),
            github_id: github_id.into(),
            kind,
            status: CourseStatus::D0Pre,
            custom: HashMap::new(),
        }
    }
}

/// Which deliverables a team covers, or a repository is enabled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelivFlags {
    pub d0: bool,
    pub d1: bool,
    pub d2: bool,
    pub d3: bool,
}

impl DelivFlags {
    /// Flags with only d0 set; the shape of a fresh solo team.
    pub fn d0_only() -> Self {
        Self {
            d0: true,
            ..Self::default()
        }
    }

    /// Flags with d1 through d3 set; the shape of a pair team.
    pub fn team_track() -> Self {
        Self {
            d0: false,
            d1: true,
            d2: true,
            d3: true,
        }
    }
}

/// A grading team. Solo students get a single-member team named after them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    /// Person ids. A d1 team has one or two distinct members.
    pub members: Vec<String>,
    /// URL of the team on the source-hosting platform, once provisioned.
    pub url: Option<String>,
    /// Deliverables this team covers.
    pub covers: DelivFlags,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl Team {
    pub fn new(id: impl Into<String>, members: Vec<String>, covers: DelivFlags) -> Self {
        Self {
            id: id.into(),
            members,
            url: None,
            covers,
            custom: HashMap::new(),
        }
    }

    pub fn has_member(&self, person_id: &str) -> bool {
        self.members.iter().any(|m| m == person_id)
    }
}

/// A graded repository on the source-hosting platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    /// Clone/browse URL, once provisioned.
    pub url: Option<String>,
    /// Teams with access to this repository.
    pub team_ids: Vec<String>,
    /// Deliverables grading is enabled for.
    pub enabled: DelivFlags,
    /// Whether the d3 pull request has been completed.
    pub d3_pull_request: bool,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl Repository {
    pub fn new(id: impl Into<String>, team_ids: Vec<String>, enabled: DelivFlags) -> Self {
        Self {
            id: id.into(),
            url: None,
            team_ids,
            enabled,
            d3_pull_request: false,
            custom: HashMap::new(),
        }
    }
}

/// A grade for one deliverable. Keyed by `(subject_id, deliv_id)` where the
/// subject is a person for graded runs and a repository for provisioning
/// placeholders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Grade {
    pub subject_id: String,
    pub deliv_id: String,
    /// `PLACEHOLDER_SCORE` until the first real grade lands.
    pub score: f64,
    /// Link to the graded commit, when one exists.
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

impl Grade {
    /// A provisioning placeholder: the deliverable exists, nothing graded yet.
    pub fn placeholder(subject_id: impl Into<String>, deliv_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            deliv_id: deliv_id.into(),
            score: PLACEHOLDER_SCORE,
            url: None,
            timestamp: Utc::now(),
            custom: HashMap::new(),
        }
    }

    /// Whether this grade meets the given pass threshold. Placeholders never do.
    pub fn passes(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_person_starts_at_bottom() {
        let p = Person::new("alice", "alice-gh", PersonKind::Student);
        assert_eq!(p.status, CourseStatus::D0Pre);
    }

    #[test]
    fn test_placeholder_never_passes() {
        let g = Grade::placeholder("secap_alice", "d0");
        assert_eq!(g.score, PLACEHOLDER_SCORE);
        assert!(!g.passes(60.0));
        assert!(!g.passes(0.0));
    }

    #[test]
    fn test_deliv_flag_shapes() {
        let solo = DelivFlags::d0_only();
        assert!(solo.d0 && !solo.d1);
        let pair = DelivFlags::team_track();
        assert!(!pair.d0 && pair.d1 && pair.d2 && pair.d3);
    }
}
