use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{Grade, Person, Repository, Team};

use crate::error::Result;

/// Persistence seam for the progression and provisioning cores.
///
/// Implementations serialize their own writes (or provide
/// last-writer-wins); the core performs no cross-record transactions
/// beyond the provisioning rollback.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_person(&self, id: &str) -> Result<Option<Person>>;
    async fn save_person(&self, person: &Person) -> Result<()>;

    async fn get_team(&self, id: &str) -> Result<Option<Team>>;
    async fn save_team(&self, team: &Team) -> Result<()>;
    /// Returns whether a record was deleted. Used only by rollback.
    async fn delete_team(&self, id: &str) -> Result<bool>;
    /// Teams the person is a member of, ordered by team id.
    async fn teams_for_person(&self, person_id: &str) -> Result<Vec<Team>>;

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>>;
    async fn save_repository(&self, repo: &Repository) -> Result<()>;
    /// Returns whether a record was deleted. Used only by rollback.
    async fn delete_repository(&self, id: &str) -> Result<bool>;
    /// Repositories reachable through the person's teams, ordered by repo id.
    async fn repositories_for_person(&self, person_id: &str) -> Result<Vec<Repository>>;

    /// Grade keyed by `(subject_id, deliv_id)`; the subject is a person id
    /// for graded runs and a repository id for provisioning placeholders.
    async fn get_grade(&self, subject_id: &str, deliv_id: &str) -> Result<Option<Grade>>;
    async fn save_grade(&self, grade: &Grade) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    people: HashMap<String, Person>,
    teams: HashMap<String, Team>,
    repositories: HashMap<String, Repository>,
    grades: HashMap<(String, String), Grade>,
}

/// In-process store used by local development and the test suites.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_person(&self, id: &str) -> Result<Option<Person>> {
        Ok(self.inner.read().await.people.get(id).cloned())
    }

    async fn save_person(&self, person: &Person) -> Result<()> {
        self.inner
            .write()
            .await
            .people
            .insert(person.id.clone(), person.clone());
        Ok(())
    }

    async fn get_team(&self, id: &str) -> Result<Option<Team>> {
        Ok(self.inner.read().await.teams.get(id).cloned())
    }

    async fn save_team(&self, team: &Team) -> Result<()> {
        self.inner
            .write()
            .await
            .teams
            .insert(team.id.clone(), team.clone());
        Ok(())
    }

    async fn delete_team(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().await.teams.remove(id).is_some())
    }

    async fn teams_for_person(&self, person_id: &str) -> Result<Vec<Team>> {
        let inner = self.inner.read().await;
        let mut teams: Vec<Team> = inner
            .teams
            .values()
            .filter(|t| t.has_member(person_id))
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(teams)
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        Ok(self.inner.read().await.repositories.get(id).cloned())
    }

    async fn save_repository(&self, repo: &Repository) -> Result<()> {
        self.inner
            .write()
            .await
            .repositories
            .insert(repo.id.clone(), repo.clone());
        Ok(())
    }

    async fn delete_repository(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().await.repositories.remove(id).is_some())
    }

    async fn repositories_for_person(&self, person_id: &str) -> Result<Vec<Repository>> {
        let inner = self.inner.read().await;
        let member_teams: Vec<&String> = inner
            .teams
            .values()
            .filter(|t| t.has_member(person_id))
            .map(|t| &t.id)
            .collect();
        let mut repos: Vec<Repository> = inner
            .repositories
            .values()
            .filter(|r| r.team_ids.iter().any(|tid| member_teams.contains(&tid)))
            .cloned()
            .collect();
        repos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(repos)
    }

    async fn get_grade(&self, subject_id: &str, deliv_id: &str) -> Result<Option<Grade>> {
        Ok(self
            .inner
            .read()
            .await
            .grades
            .get(&(subject_id.to_string(), deliv_id.to_string()))
            .cloned())
    }

    async fn save_grade(&self, grade: &Grade) -> Result<()> {
        self.inner.write().await.grades.insert(
            (grade.subject_id.clone(), grade.deliv_id.clone()),
            grade.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DelivFlags, PersonKind};

    #[tokio::test]
    async fn test_repositories_reachable_through_teams() {
        let store = MemoryStore::new();
        store
            .save_person(&Person::new("alice", "alice-gh", PersonKind::Student))
            .await
            .unwrap();
        store
            .save_team(&Team::new("alice", vec!["alice".into()], DelivFlags::d0_only()))
            .await
            .unwrap();
        store
            .save_repository(&Repository::new(
                "secap_alice",
                vec!["alice".into()],
                DelivFlags::d0_only(),
            ))
            .await
            .unwrap();
        store
            .save_repository(&Repository::new(
                "secap_bob",
                vec!["bob".into()],
                DelivFlags::d0_only(),
            ))
            .await
            .unwrap();

        let repos = store.repositories_for_person("alice").await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].id, "secap_alice");
        assert!(store.repositories_for_person("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grade_keying_separates_person_and_repo_subjects() {
        let store = MemoryStore::new();
        store
            .save_grade(&Grade::placeholder("secap_alice", "d0"))
            .await
            .unwrap();
        let mut real = Grade::placeholder("alice", "d0");
        real.score = 72.0;
        store.save_grade(&real).await.unwrap();

        let placeholder = store.get_grade("secap_alice", "d0").await.unwrap().unwrap();
        assert_eq!(placeholder.score, common::PLACEHOLDER_SCORE);
        let graded = store.get_grade("alice", "d0").await.unwrap().unwrap();
        assert_eq!(graded.score, 72.0);
        assert!(store.get_grade("alice", "d1").await.unwrap().is_none());
    }
}
