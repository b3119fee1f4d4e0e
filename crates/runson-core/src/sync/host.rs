//! Repository discovery seam.

use async_trait::async_trait;
use github_gateway::{Credential, GitHub, RemoteRepository};

/// Where organizations and repositories are listed from.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn list_organizations(&self, credential: &Credential) -> github_gateway::Result<Vec<String>>;

    async fn list_repositories(
        &self,
        credential: &Credential,
        org: Option<&str>,
    ) -> github_gateway::Result<Vec<RemoteRepository>>;
}

#[async_trait]
impl RepositoryHost for GitHub {
    async fn list_organizations(&self, credential: &Credential) -> github_gateway::Result<Vec<String>> {
        GitHub::list_organizations(self, credential).await
    }

    async fn list_repositories(
        &self,
        credential: &Credential,
        org: Option<&str>,
    ) -> github_gateway::Result<Vec<RemoteRepository>> {
        GitHub::list_repositories(self, credential, org).await
    }
}
