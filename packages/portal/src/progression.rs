use std::sync::Arc;

use tracing::{debug, warn};

use common::CourseStatus;

use crate::error::{PortalError, Result};
use crate::store::DataStore;

/// Computes a student's progression status from persisted facts.
///
/// The walk starts at the bottom and only ascends, so the result is
/// monotonic while the underlying facts (repositories, teams, grades)
/// only accumulate. It reads persisted records exclusively and never
/// calls the source-hosting platform.
pub struct ProgressionEngine {
    store: Arc<dyn DataStore>,
    pass_threshold: f64,
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn DataStore>, pass_threshold: f64) -> Self {
        Self {
            store,
            pass_threshold,
        }
    }

    /// Walk the progression ladder for one person and cache the result on
    /// their record. Each guarded step fires at most once per call, in
    /// order, and never downgrades.
    pub async fn compute_status(&self, person_id: &str) -> Result<CourseStatus> {
        let mut person = self.store.get_person(person_id).await?.ok_or_else(|| {
            PortalError::validation(format!("Person '{person_id}' is not registered in the course."))
        })?;

        let mut repos = self.store.repositories_for_person(person_id).await?;
        let teams = self.store.teams_for_person(person_id).await?;

        let mut status = CourseStatus::D0Pre;

        if repos.iter().any(|r| r.enabled.d0) {
            status = CourseStatus::D0;
        }

        if status == CourseStatus::D0 && self.passed(person_id, "d0").await? {
            status = CourseStatus::D1Unlocked;
        }

        if status == CourseStatus::D1Unlocked && teams.iter().any(|t| t.covers.d1) {
            status = CourseStatus::D1TeamSet;
        }

        if status == CourseStatus::D1TeamSet && repos.iter().any(|r| r.enabled.d1) {
            status = CourseStatus::D1;
        }

        if status == CourseStatus::D1 && self.passed(person_id, "d1").await? {
            // Passing d1 opens d2 grading on every d1 repository.
            for repo in repos.iter_mut().filter(|r| r.enabled.d1) {
                repo.enabled.d2 = true;
                self.store.save_repository(repo).await?;
            }
            status = CourseStatus::D2;
        }

        if status == CourseStatus::D2 && self.passed(person_id, "d2").await? {
            status = CourseStatus::D3Pre;
        }

        if status == CourseStatus::D3Pre && repos.iter().any(|r| r.enabled.d2 && r.d3_pull_request)
        {
            status = CourseStatus::D3;
        }

        if status == CourseStatus::D3 {
            // Terminal: d3 grading follows d2 wherever it is enabled.
            // Written on every call; the write is idempotent.
            for repo in repos.iter_mut().filter(|r| r.enabled.d2) {
                repo.enabled.d3 = true;
                self.store.save_repository(repo).await?;
            }
        }

        // The cache never regresses even if a raw fact disappears.
        let status = status.max(person.status);
        debug!(person_id = %person_id, status = %status, "Computed progression status");

        person.status = status;
        if let Err(e) = self.store.save_person(&person).await {
            // Best effort: truth lives in the raw facts, the computed
            // value is still valid for the caller.
            warn!(person_id = %person_id, error = %e, "Failed to cache progression status");
        }

        Ok(status)
    }

    async fn passed(&self, person_id: &str, deliv_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_grade(person_id, deliv_id)
            .await?
            .map(|g| g.passes(self.pass_threshold))
            .unwrap_or(false))
    }
}
