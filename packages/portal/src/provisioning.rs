use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use common::config::{CourseConfig, GithubConfig};
use common::{CourseStatus, DelivFlags, Grade, Person, PersonKind, Repository, Team};

use crate::error::{PortalError, Result};
use crate::hosting::SourceHosting;
use crate::progression::ProgressionEngine;
use crate::store::DataStore;

/// Shown when an internal failure must not leak detail to the student.
const CONTACT_STAFF: &str =
    "Something went wrong while provisioning. Please contact the course staff.";

const RETRY_PROVISIONING: &str =
    "Repository provisioning failed. Please try again, and contact the course staff if the problem persists.";

const TEAM_NAME_ATTEMPTS: usize = 32;

/// Snapshot returned to the student after a successful provisioning call.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub person_id: String,
    pub status: CourseStatus,
    pub repo_url: Option<String>,
    pub team_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailurePayload {
    pub should_logout: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum ProvisionPayload {
    Status(StatusPayload),
    Failure(FailurePayload),
}

impl ProvisionPayload {
    fn failure(message: impl Into<String>) -> Self {
        Self::Failure(FailurePayload {
            should_logout: false,
            message: message.into(),
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Transactional creation of team + repository + grade placeholders,
/// gated by the progression state machine.
///
/// Local records are created first; if the remote side then fails, the
/// local records are rolled back so the student can simply retry.
pub struct ProvisioningService {
    store: Arc<dyn DataStore>,
    hosting: Arc<dyn SourceHosting>,
    progression: ProgressionEngine,
    course: CourseConfig,
    github: GithubConfig,
}

impl ProvisioningService {
    pub fn new(
        store: Arc<dyn DataStore>,
        hosting: Arc<dyn SourceHosting>,
        course: CourseConfig,
        github: GithubConfig,
    ) -> Self {
        let progression = ProgressionEngine::new(Arc::clone(&store), course.pass_threshold);
        Self {
            store,
            hosting,
            progression,
            course,
            github,
        }
    }

    pub fn progression(&self) -> &ProgressionEngine {
        &self.progression
    }

    /// Register a person on first sighting. Idempotent.
    pub async fn handle_unknown_user(&self, github_id: &str) -> Result<Person> {
        if let Some(person) = self.store.get_person(github_id).await? {
            return Ok(person);
        }
        let person = Person::new(github_id, github_id, PersonKind::Student);
        self.store.save_person(&person).await?;
        info!(person_id = %github_id, "Registered new person");
        Ok(person)
    }

    /// Entry point for student-initiated provisioning. `people[0]` is the
    /// requester. Every rejection maps to a human-readable failure payload;
    /// internal errors never leak detail.
    pub async fn provision(&self, deliv_id: &str, people: &[String]) -> ProvisionPayload {
        info!(deliv_id = %deliv_id, people = ?people, "Provisioning request");

        let result = match (deliv_id, people.len()) {
            ("d0", 1) => self.provision_d0(&people[0]).await,
            ("d1", 1) => self.upgrade_to_d1(&people[0]).await,
            ("d1", 2) => self.provision_d1_pair(&people[0], &people[1]).await,
            ("d0", _) => Err(PortalError::validation("d0 is provisioned individually.")),
            ("d1", _) => Err(PortalError::validation(
                "A d1 team has one or two distinct members.",
            )),
            _ => Err(PortalError::validation(format!(
                "Deliverable '{deliv_id}' cannot be provisioned."
            ))),
        };

        match result {
            Ok(payload) => ProvisionPayload::Status(payload),
            Err(PortalError::Validation(message)) => {
                warn!(deliv_id = %deliv_id, message = %message, "Provisioning rejected");
                ProvisionPayload::failure(message)
            }
            Err(PortalError::Hosting(detail)) => {
                error!(deliv_id = %deliv_id, detail = %detail, "Remote provisioning failed");
                ProvisionPayload::failure(RETRY_PROVISIONING)
            }
            Err(e) => {
                error!(deliv_id = %deliv_id, error = %e, "Provisioning failed");
                ProvisionPayload::failure(CONTACT_STAFF)
            }
        }
    }

    /// Solo d0 start: one person, fresh team and repository named after them.
    async fn provision_d0(&self, person_id: &str) -> Result<StatusPayload> {
        let person = self.require_person(person_id).await?;
        let status = self.progression.compute_status(&person.id).await?;
        if status != CourseStatus::D0Pre {
            return Err(PortalError::validation(format!(
                "You have already started d0 (current status: {status})."
            )));
        }

        let repo_id = format!("{}{}", self.course.project_prefix, person.id);
        if self.store.get_team(&person.id).await?.is_some() {
            return Err(PortalError::Consistency(format!(
                "team '{}' already exists",
                person.id
            )));
        }
        if self.store.get_repository(&repo_id).await?.is_some() {
            return Err(PortalError::Consistency(format!(
                "repository '{repo_id}' already exists"
            )));
        }

        let team = Team::new(&person.id, vec![person.id.clone()], DelivFlags::d0_only());
        let repo = Repository::new(&repo_id, vec![team.id.clone()], DelivFlags::d0_only());
        self.store.save_team(&team).await?;
        self.store.save_repository(&repo).await?;

        let (team, repo) = self.finish_remote(team, repo, &["d0"]).await?;

        let status = self.progression.compute_status(&person.id).await?;
        Ok(StatusPayload {
            person_id: person.id,
            status,
            repo_url: repo.url,
            team_url: team.url,
        })
    }

    /// Individual d0 -> d1 upgrade: same repository, d1 track opened.
    async fn upgrade_to_d1(&self, person_id: &str) -> Result<StatusPayload> {
        let person = self.require_person(person_id).await?;
        if !self.passed_d0(&person.id).await? {
            return Err(PortalError::validation(format!(
                "You must have achieved a score of {}% or more on d0 before starting d1.",
                self.course.pass_threshold
            )));
        }

        let repos = self.store.repositories_for_person(&person.id).await?;
        if repos.iter().any(|r| r.enabled.d1) {
            return Err(PortalError::validation(
                "You already have a d1 repository.",
            ));
        }
        let mut repo = repos
            .into_iter()
            .find(|r| r.enabled.d0)
            .ok_or_else(|| PortalError::validation("Provision d0 before starting d1."))?;

        repo.enabled.d1 = true;
        self.store.save_repository(&repo).await?;

        // The existing solo team takes on the whole d1-d3 track.
        for team_id in &repo.team_ids {
            if let Some(mut team) = self.store.get_team(team_id).await? {
                team.covers.d1 = true;
                team.covers.d2 = true;
                team.covers.d3 = true;
                self.store.save_team(&team).await?;
            }
        }

        self.ensure_placeholders(&repo.id, &["d1", "d2", "d3"]).await?;

        let status = self.progression.compute_status(&person.id).await?;
        let team_url = match repo.team_ids.first() {
            Some(tid) => self.store.get_team(tid).await?.and_then(|t| t.url),
            None => None,
        };
        Ok(StatusPayload {
            person_id: person.id,
            status,
            repo_url: repo.url.clone(),
            team_url,
        })
    }

    /// Paired d1 start: fresh randomly named team, fresh repository with
    /// the d1-d3 track enabled.
    async fn provision_d1_pair(&self, requester: &str, partner: &str) -> Result<StatusPayload> {
        if requester == partner {
            return Err(PortalError::validation(
                "The same person cannot appear twice on a d1 team.",
            ));
        }
        self.require_person(requester).await?;
        self.require_person(partner).await?;

        for person_id in [requester, partner] {
            if !self.passed_d0(person_id).await? {
                return Err(PortalError::validation(format!(
                    "All teammates must have achieved a score of {}% or more on d0 to form a d1 team.",
                    self.course.pass_threshold
                )));
            }
        }
        for person_id in [requester, partner] {
            let status = self.progression.compute_status(person_id).await?;
            if status != CourseStatus::D1Unlocked {
                return Err(PortalError::validation(format!(
                    "All teammates must be ready to start d1; '{person_id}' has status {status}."
                )));
            }
        }

        let team_id = self.fresh_team_name().await?;
        let repo_id = format!("{}{}", self.course.project_prefix, team_id);
        if self.store.get_repository(&repo_id).await?.is_some() {
            return Err(PortalError::Consistency(format!(
                "repository '{repo_id}' already exists"
            )));
        }

        let team = Team::new(
            &team_id,
            vec![requester.to_string(), partner.to_string()],
            DelivFlags::team_track(),
        );
        let repo = Repository::new(&repo_id, vec![team_id.clone()], DelivFlags::team_track());
        self.store.save_team(&team).await?;
        self.store.save_repository(&repo).await?;

        let (team, repo) = self.finish_remote(team, repo, &["d1", "d2", "d3"]).await?;

        let status = self.progression.compute_status(requester).await?;
        Ok(StatusPayload {
            person_id: requester.to_string(),
            status,
            repo_url: repo.url,
            team_url: team.url,
        })
    }

    /// Provision the remote side for freshly created local records, rolling
    /// the local records back if the platform fails. On success the URLs
    /// are persisted and placeholder grades created.
    async fn finish_remote(
        &self,
        mut team: Team,
        mut repo: Repository,
        placeholder_delivs: &[&str],
    ) -> Result<(Team, Repository)> {
        let outcome = self
            .hosting
            .provision_repository(
                &repo.id,
                std::slice::from_ref(&team),
                &self.import_url(),
                &self.github.webhook_url(),
            )
            .await;

        match outcome {
            Ok(true) => {}
            other => {
                warn!(repo_id = %repo.id, team_id = %team.id, "Remote provisioning failed; rolling back local records");
                let _ = self.store.delete_repository(&repo.id).await;
                let _ = self.store.delete_team(&team.id).await;
                return Err(match other {
                    Err(e) => e,
                    _ => PortalError::Hosting("platform reported provisioning failure".into()),
                });
            }
        }

        team.url = Some(self.hosting.team_url(&team).await?);
        repo.url = Some(self.hosting.repository_url(&repo).await?);
        self.store.save_team(&team).await?;
        self.store.save_repository(&repo).await?;

        self.ensure_placeholders(&repo.id, placeholder_delivs).await?;

        info!(repo_id = %repo.id, team_id = %team.id, "Provisioned");
        Ok((team, repo))
    }

    async fn ensure_placeholders(&self, repo_id: &str, delivs: &[&str]) -> Result<()> {
        for deliv_id in delivs {
            if self.store.get_grade(repo_id, deliv_id).await?.is_none() {
                self.store
                    .save_grade(&Grade::placeholder(repo_id, *deliv_id))
                    .await?;
            }
        }
        Ok(())
    }

    /// Sample 6 hex characters from the thread CSPRNG until the name is
    /// unused.
    async fn fresh_team_name(&self) -> Result<String> {
        for _ in 0..TEAM_NAME_ATTEMPTS {
            let bytes: [u8; 3] = rand::rng().random();
            let name = format!("{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]);
            if self.store.get_team(&name).await?.is_none() {
                return Ok(name);
            }
        }
        Err(PortalError::Store(
            "could not find an unused team name".into(),
        ))
    }

    fn import_url(&self) -> String {
        format!(
            "https://{}/{}/bootstrap",
            self.github.host, self.github.org
        )
    }

    async fn require_person(&self, id: &str) -> Result<Person> {
        self.store.get_person(id).await?.ok_or_else(|| {
            PortalError::validation(format!("Person '{id}' is not registered in the course."))
        })
    }

    async fn passed_d0(&self, person_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_grade(person_id, "d0")
            .await?
            .map(|g| g.passes(self.course.pass_threshold))
            .unwrap_or(false))
    }
}
