//! GitHub-specific REST and GraphQL operations.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{ApiClient, ApiClientConfig, RestRequest};
use crate::credential::Credential;
use crate::error::{ApiError, Result};

/// Page size used for every paginated listing.
pub const PAGE_SIZE: usize = 30;

const CREATE_COMMIT_MUTATION: &str = r#"
mutation($input: CreateCommitOnBranchInput!) {
  createCommitOnBranch(input: $input) {
    commit { oid url }
  }
}
"#;

/// A repository visible to the acting credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub id: u64,
    pub name: String,
    pub owner: String,
    pub owner_id: u64,
    pub private: bool,
}

impl RemoteRepository {
    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    fn from_listing(value: &Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Owner {
            login: String,
            id: u64,
        }
        #[derive(Deserialize)]
        struct Listing {
            id: u64,
            name: String,
            owner: Owner,
            private: bool,
        }
        let listing: Listing = serde_json::from_value(value.clone())?;
        Ok(Self {
            id: listing.id,
            name: listing.name,
            owner: listing.owner.login,
            owner_id: listing.owner.id,
            private: listing.private,
        })
    }
}

/// One file addition sent with `createCommitOnBranch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAddition {
    pub path: String,
    /// Base64-encoded file contents
    pub contents: String,
}

impl FileAddition {
    pub fn from_bytes(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            contents: BASE64.encode(data),
        }
    }
}

/// Commit created through the GraphQL API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCommit {
    pub oid: String,
    pub url: String,
}

/// GitHub API endpoints.
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub api_url: String,
    pub graphql_url: String,
}

impl GitHubEndpoints {
    pub fn new(api_url: &str, graphql_url: Option<&str>) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        let graphql_url = graphql_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{api_url}/graphql"));
        Self {
            api_url,
            graphql_url,
        }
    }
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self::new("https://api.github.com", None)
    }
}

/// GitHub client built on [`ApiClient`].
#[derive(Debug, Clone)]
pub struct GitHub {
    client: ApiClient,
    endpoints: GitHubEndpoints,
}

impl GitHub {
    /// Create a client with GitHub's default headers and the given timeout.
    pub fn new(endpoints: GitHubEndpoints, timeout: Duration) -> Result<Self> {
        let config = ApiClientConfig {
            timeout,
            default_headers: vec![
                ("Accept".to_string(), "application/vnd.github+json".to_string()),
                ("X-GitHub-Api-Version".to_string(), "2022-11-28".to_string()),
            ],
            ..ApiClientConfig::default()
        };
        Ok(Self::with_client(ApiClient::new(config)?, endpoints))
    }

    pub fn with_client(client: ApiClient, endpoints: GitHubEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &GitHubEndpoints {
        &self.endpoints
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Issue a REST request and surface OAuth-style `error` payloads.
    pub async fn request(&self, request: RestRequest, credential: Option<&Credential>) -> Result<Value> {
        let accepted = request.accept_statuses.clone();
        let response = self
            .client
            .rest_request(&request, credential.map(Credential::secret))
            .await?;

        // Accepted failures come back as {"error", "status"} sentinels.
        let is_sentinel = response
            .get("status")
            .and_then(Value::as_u64)
            .is_some_and(|s| accepted.contains(&(s as u16)));
        if let (Some(error), false) = (response.get("error"), is_sentinel) {
            let mut message = response
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(uri) = response.get("error_uri").and_then(Value::as_str) {
                message.push_str(&format!(" Additional information: {uri}"));
            }
            return Err(ApiError::Status {
                status: 400,
                message,
                body: error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string()),
                retryable: false,
            });
        }
        Ok(response)
    }

    /// List repositories visible to `credential`, optionally within one organization.
    pub async fn list_repositories(
        &self,
        credential: &Credential,
        org: Option<&str>,
    ) -> Result<Vec<RemoteRepository>> {
        let endpoint = match org {
            Some(org) => format!("{}/orgs/{org}/repos", self.endpoints.api_url),
            None if credential.is_installation() => {
                format!("{}/installation/repositories", self.endpoints.api_url)
            }
            None => format!("{}/user/repos", self.endpoints.api_url),
        };

        let mut repos = Vec::new();
        for page in 1.. {
            let url = format!("{endpoint}?per_page={PAGE_SIZE}&page={page}");
            let result = self
                .request(RestRequest::get(url).max_attempts(2), Some(credential))
                .await?;
            let items = match result.get("repositories") {
                Some(Value::Array(items)) => items.clone(),
                _ => result.as_array().cloned().unwrap_or_default(),
            };
            if items.is_empty() {
                break;
            }
            for item in &items {
                repos.push(RemoteRepository::from_listing(item)?);
            }
            if items.len() < PAGE_SIZE {
                break;
            }
        }
        debug!(count = repos.len(), org = ?org, "listed repositories");
        Ok(repos)
    }

    /// List organizations the credential can act on.
    ///
    /// Installation credentials are scoped to the organization they were
    /// tagged with; an untagged one reports the owners of the repositories
    /// the installation can see.
    pub async fn list_organizations(&self, credential: &Credential) -> Result<Vec<String>> {
        if credential.is_installation() {
            if let Some(org) = credential.org() {
                return Ok(vec![org.to_string()]);
            }
            let mut owners: Vec<String> = self
                .list_repositories(credential, None)
                .await?
                .into_iter()
                .map(|repo| repo.owner)
                .collect();
            owners.sort();
            owners.dedup();
            return Ok(owners);
        }

        let endpoint = format!("{}/user/memberships/orgs", self.endpoints.api_url);
        let mut orgs = Vec::new();
        for page in 1.. {
            let url = format!("{endpoint}?per_page={PAGE_SIZE}&page={page}");
            let result = self
                .request(RestRequest::get(url).max_attempts(2), Some(credential))
                .await?;
            let items = result.as_array().cloned().unwrap_or_default();
            if items.is_empty() {
                break;
            }
            for item in &items {
                let login = item
                    .pointer("/organization/login")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ApiError::UnexpectedResponse("membership without organization.login".into())
                    })?;
                orgs.push(login.to_string());
            }
            if items.len() < PAGE_SIZE {
                break;
            }
        }
        Ok(orgs)
    }

    /// Create a commit on `branch` that is only accepted if the branch tip
    /// still equals `expected_head_oid`.
    pub async fn create_commit_on_branch(
        &self,
        credential: &Credential,
        repo_full_name: &str,
        branch: &str,
        expected_head_oid: &str,
        headline: &str,
        additions: &[FileAddition],
    ) -> Result<CreatedCommit> {
        let variables = json!({
            "input": {
                "branch": {
                    "repositoryNameWithOwner": repo_full_name,
                    "branchName": branch,
                },
                "expectedHeadOid": expected_head_oid,
                "message": { "headline": headline },
                "fileChanges": { "additions": additions },
            }
        });

        let result = self
            .client
            .graphql_query(
                &self.endpoints.graphql_url,
                CREATE_COMMIT_MUTATION,
                variables,
                Some(credential.secret()),
            )
            .await?;

        let commit = result
            .pointer("/data/createCommitOnBranch/commit")
            .cloned()
            .ok_or_else(|| ApiError::UnexpectedResponse("createCommitOnBranch returned no commit".into()))?;
        let commit: CreatedCommit = serde_json::from_value(commit)?;
        info!(repo = %repo_full_name, branch = %branch, oid = %commit.oid, "created commit through GraphQL");
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_joins_owner_and_name() {
        let repo = RemoteRepository {
            id: 1,
            name: "service".into(),
            owner: "acme".into(),
            owner_id: 7,
            private: true,
        };
        assert_eq!(repo.full_name(), "acme/service");
    }

    #[test]
    fn listing_shape_is_flattened() {
        let value = json!({
            "id": 10,
            "name": "api",
            "owner": { "login": "acme", "id": 99, "type": "Organization" },
            "private": false,
            "default_branch": "main"
        });
        let repo = RemoteRepository::from_listing(&value).unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.owner_id, 99);
        assert!(!repo.private);
    }

    #[test]
    fn graphql_endpoint_defaults_under_api_url() {
        let endpoints = GitHubEndpoints::new("https://ghe.example.com/api/v3/", None);
        assert_eq!(endpoints.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(endpoints.graphql_url, "https://ghe.example.com/api/v3/graphql");
    }

    #[test]
    fn file_addition_encodes_contents() {
        let addition = FileAddition::from_bytes(".github/workflows/ci.yml", b"jobs:\n");
        assert_eq!(addition.contents, "am9iczoK");
    }
}
