//! In-memory GitHub fake.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::GitHubError;
use crate::github::{GitHubClient, RepositoryDetails, UserDetails};
use crate::models::RawPullRequest;

#[derive(Debug, Default)]
struct State {
    pulls: HashMap<String, Vec<RawPullRequest>>,
    repositories: HashMap<String, RepositoryDetails>,
    users: HashMap<String, UserDetails>,
    failures: HashMap<usize, GitHubError>,
}

/// A scripted [`GitHubClient`].
///
/// Unknown repositories and users resolve to `None`. Every call counts as one
/// request; [`Self::fail_on_request`] makes a given request fail.
#[derive(Debug, Default)]
pub struct FakeGitHubClient {
    state: Mutex<State>,
    requests: AtomicUsize,
}

impl FakeGitHubClient {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds pull requests served for `owner/name`, in page order.
    pub fn add_pull_requests(&self, repository: &str, pulls: Vec<RawPullRequest>) {
        self.state
            .lock()
            .pulls
            .entry(repository.to_string())
            .or_default()
            .extend(pulls);
    }

    /// Sets the details returned for `owner/name`.
    pub fn set_repository(&self, full_name: &str, details: RepositoryDetails) {
        self.state.lock().repositories.insert(full_name.to_string(), details);
    }

    /// Sets the profile returned for `login`.
    pub fn set_user(&self, login: &str, details: UserDetails) {
        self.state.lock().users.insert(login.to_string(), details);
    }

    /// Makes the `n`th request (1-based, across all methods) fail with `error`.
    pub fn fail_on_request(&self, n: usize, error: GitHubError) {
        self.state.lock().failures.insert(n, error);
    }

    /// Returns the number of requests made so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn request(&self) -> Result<(), GitHubError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        match self.state.lock().failures.remove(&n) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GitHubClient for FakeGitHubClient {
    async fn fetch_pull_requests(
        &self,
        repository: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RawPullRequest>, GitHubError> {
        self.request()?;
        let per_page = per_page as usize;
        let skip = (page.max(1) as usize - 1) * per_page;
        Ok(self
            .state
            .lock()
            .pulls
            .get(repository)
            .map(|pulls| pulls.iter().skip(skip).take(per_page).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_repository(&self, owner: &str, name: &str) -> Result<Option<RepositoryDetails>, GitHubError> {
        self.request()?;
        Ok(self
            .state
            .lock()
            .repositories
            .get(&format!("{owner}/{name}"))
            .cloned())
    }

    async fn fetch_user(&self, login: &str) -> Result<Option<UserDetails>, GitHubError> {
        self.request()?;
        Ok(self.state.lock().users.get(login).cloned())
    }
}
