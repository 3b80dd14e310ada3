//! Typed views of the records kept in the entity store.
//!
//! Optional fields and unset flags are skipped when serializing so that an
//! upsert from one pipeline never clears what another pipeline filled in.

use crate::store::Record;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serializes a model into a store record.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record, serde_json::Error> {
    serde_json::to_value(value)
}

/// Deserializes a store record into a model.
///
/// # Errors
///
/// Returns an error if the record does not have the model's shape.
pub fn from_record<T: DeserializeOwned>(record: &Record) -> Result<T, serde_json::Error> {
    T::deserialize(record)
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// A GitHub account as embedded in pull request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Numeric GitHub id.
    pub id: u64,
    /// Login name.
    pub login: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// The repository a pull request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Numeric GitHub id.
    pub id: u64,
    /// Owner login.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Returns `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A commit as embedded in a pull request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommit {
    /// Commit hash.
    pub sha: String,
    /// Commit message.
    pub message: String,
    /// Author, when the commit email maps to a GitHub account.
    #[serde(default)]
    pub author: Option<UserRef>,
    /// Authoring time.
    pub authored_at: DateTime<Utc>,
    /// Lines added.
    #[serde(default)]
    pub additions: u64,
    /// Lines removed.
    #[serde(default)]
    pub deletions: u64,
}

/// A pull request payload as fetched from GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPullRequest {
    /// Numeric GitHub id.
    pub github_id: u64,
    /// Number within the repository.
    pub number: u64,
    /// Title.
    pub title: String,
    /// `open` or `closed`.
    pub state: String,
    /// Owning repository.
    pub repository: RepoRef,
    /// Author.
    pub user: UserRef,
    /// Who merged it.
    #[serde(default)]
    pub merged_by: Option<UserRef>,
    /// When it was merged.
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update on GitHub.
    pub updated_at: DateTime<Utc>,
    /// Lines added.
    #[serde(default)]
    pub additions: u64,
    /// Lines removed.
    #[serde(default)]
    pub deletions: u64,
    /// Commits in the pull request.
    #[serde(default)]
    pub commits: Vec<RawCommit>,
    /// Whether entity extraction has consumed this payload.
    #[serde(default)]
    pub processed: bool,
}

impl RawPullRequest {
    /// Returns true if the pull request was merged.
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// A repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Numeric GitHub id.
    pub github_id: u64,
    /// Owner login.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    /// Description from GitHub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Star count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    /// Fork count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forks: Option<u64>,
    /// Primary language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Set once enrichment has visited the record.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_enriched: bool,
    /// Last local update.
    pub updated_at: DateTime<Utc>,
}

/// A GitHub user who authored, merged or committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    /// Numeric GitHub id.
    pub github_id: u64,
    /// Login name.
    pub login: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Profile bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Company.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Follower count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<u64>,
    /// Public repository count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_repos: Option<u64>,
    /// Set once enrichment has visited the record.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_enriched: bool,
    /// Last local update.
    pub updated_at: DateTime<Utc>,
}

impl Contributor {
    /// Creates a bare contributor from a payload reference.
    #[must_use]
    pub fn from_ref(user: &UserRef, updated_at: DateTime<Utc>) -> Self {
        Self {
            github_id: user.id,
            login: user.login.clone(),
            avatar_url: user.avatar_url.clone(),
            name: None,
            bio: None,
            company: None,
            location: None,
            followers: None,
            public_repos: None,
            is_enriched: false,
            updated_at,
        }
    }
}

/// A normalized pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Numeric GitHub id.
    pub github_id: u64,
    /// Number within the repository.
    pub number: u64,
    /// Title.
    pub title: String,
    /// `open` or `closed`.
    pub state: String,
    /// Owning repository id.
    pub repository_id: u64,
    /// Owner login, denormalized for URL building.
    pub repo_owner: String,
    /// Repository name, denormalized for URL building.
    pub repo_name: String,
    /// Author id.
    pub author_id: u64,
    /// Merger id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_by_id: Option<u64>,
    /// When it was merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Lines added.
    pub additions: u64,
    /// Lines removed.
    pub deletions: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update on GitHub.
    pub updated_at: DateTime<Utc>,
}

/// A commit belonging to a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit hash.
    pub sha: String,
    /// Owning merge request id.
    pub merge_request_id: u64,
    /// Author id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<u64>,
    /// Commit message.
    pub message: String,
    /// Lines added.
    pub additions: u64,
    /// Lines removed.
    pub deletions: u64,
    /// Authoring time.
    pub committed_at: DateTime<Utc>,
    /// Last local update.
    pub updated_at: DateTime<Utc>,
}

/// A computed contributor ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRanking {
    /// Ranked contributor.
    pub contributor_id: u64,
    /// Login, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// 1-based rank.
    pub rank: u64,
    /// Weighted score.
    pub score: f64,
    /// Merged pull requests authored.
    pub merged_count: u64,
    /// All pull requests authored.
    pub pr_count: u64,
    /// Commits authored.
    pub commit_count: u64,
    /// Lines added plus removed across authored pull requests.
    pub lines_changed: u64,
    /// When the ranking was computed.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unset_enrichment_fields_are_not_serialized() {
        let user = UserRef {
            id: 9,
            login: "octo".to_string(),
            avatar_url: None,
        };
        let record = to_record(&Contributor::from_ref(&user, at(1))).unwrap();
        let obj = record.as_object().unwrap();

        assert!(!obj.contains_key("is_enriched"));
        assert!(!obj.contains_key("bio"));
        assert_eq!(obj["login"], "octo");
    }

    #[test]
    fn test_record_round_trip_with_missing_flags() {
        let record = serde_json::json!({
            "github_id": 1,
            "owner": "rust-lang",
            "name": "rust",
            "full_name": "rust-lang/rust",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let repo: Repository = from_record(&record).unwrap();
        assert!(!repo.is_enriched);
        assert_eq!(repo.stars, None);
        assert_eq!(repo.updated_at, at(1));
    }

    #[test]
    fn test_raw_pull_request_always_carries_processed() {
        let pr = RawPullRequest {
            github_id: 5,
            number: 1,
            title: "Fix".to_string(),
            state: "open".to_string(),
            repository: RepoRef {
                id: 1,
                owner: "o".to_string(),
                name: "r".to_string(),
            },
            user: UserRef {
                id: 2,
                login: "u".to_string(),
                avatar_url: None,
            },
            merged_by: None,
            merged_at: None,
            created_at: at(1),
            updated_at: at(2),
            additions: 0,
            deletions: 0,
            commits: Vec::new(),
            processed: false,
        };
        let record = to_record(&pr).unwrap();
        assert_eq!(record["processed"], false);
        assert!(!pr.is_merged());
        assert_eq!(pr.repository.full_name(), "o/r");
    }
}
