//! GitHub client decorator that retries transient failures.

use super::{GitHubClient, RepositoryDetails, UserDetails};
use crate::errors::GitHubError;
use crate::models::RawPullRequest;
use crate::pipeline::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Retries rate-limit and transient failures of another client with bounded backoff.
pub struct RetryingGitHubClient {
    inner: Arc<dyn GitHubClient>,
    config: RetryConfig,
}

impl RetryingGitHubClient {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn GitHubClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl GitHubClient for RetryingGitHubClient {
    async fn fetch_pull_requests(
        &self,
        repository: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RawPullRequest>, GitHubError> {
        with_retry_if(
            &self.config,
            "github.fetch_pull_requests",
            || self.inner.fetch_pull_requests(repository, page, per_page),
            GitHubError::is_transient,
        )
        .await
    }

    async fn fetch_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepositoryDetails>, GitHubError> {
        with_retry_if(
            &self.config,
            "github.fetch_repository",
            || self.inner.fetch_repository(owner, name),
            GitHubError::is_transient,
        )
        .await
    }

    async fn fetch_user(&self, login: &str) -> Result<Option<UserDetails>, GitHubError> {
        with_retry_if(
            &self.config,
            "github.fetch_user",
            || self.inner.fetch_user(login),
            GitHubError::is_transient,
        )
        .await
    }
}
