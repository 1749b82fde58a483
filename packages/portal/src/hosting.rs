use async_trait::async_trait;

use common::{Repository, Team};

use crate::error::Result;

/// Seam onto the source-hosting platform (repository creation, webhook
/// install, import). The orchestrator owns rollback on partial failure;
/// implementations only report whether the whole provisioning succeeded.
#[async_trait]
pub trait SourceHosting: Send + Sync {
    /// Create `repo_name` in the course organization, import the bootstrap
    /// sources from `import_url`, grant `teams` access, and install the
    /// grading webhook. Returns `true` only on full success.
    async fn provision_repository(
        &self,
        repo_name: &str,
        teams: &[Team],
        import_url: &str,
        webhook_url: &str,
    ) -> Result<bool>;

    /// Browse URL of a repository in the course organization.
    async fn repository_url(&self, repo: &Repository) -> Result<String>;

    /// Browse URL of a team in the course organization.
    async fn team_url(&self, team: &Team) -> Result<String>;
}
