//! GitHub API collaborator.
//!
//! The HTTP client itself lives outside this crate; pipelines consume it
//! through [`GitHubClient`], which may fail transiently and is expected to be
//! wrapped in [`RetryingGitHubClient`].

mod retrying;

pub use retrying::RetryingGitHubClient;

use crate::errors::GitHubError;
use crate::models::RawPullRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Repository fields used by enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDetails {
    /// Description.
    pub description: Option<String>,
    /// Star count.
    pub stars: u64,
    /// Fork count.
    pub forks: u64,
    /// Primary language.
    pub language: Option<String>,
}

/// User profile fields used by enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    /// Display name.
    pub name: Option<String>,
    /// Profile bio.
    pub bio: Option<String>,
    /// Company.
    pub company: Option<String>,
    /// Location.
    pub location: Option<String>,
    /// Follower count.
    pub followers: u64,
    /// Public repository count.
    pub public_repos: u64,
}

/// Rate-limited access to the GitHub API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Fetches one page (1-based) of pull requests for `owner/name`, most
    /// recently updated first. A short page means there are no more.
    async fn fetch_pull_requests(
        &self,
        repository: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RawPullRequest>, GitHubError>;

    /// Fetches repository details. `None` if the repository no longer exists.
    async fn fetch_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepositoryDetails>, GitHubError>;

    /// Fetches a user profile. `None` if the account no longer exists.
    async fn fetch_user(&self, login: &str) -> Result<Option<UserDetails>, GitHubError>;
}
