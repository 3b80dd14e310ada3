//! Record fixtures.

use chrono::{DateTime, Duration, Utc};

use crate::errors::StoreError;
use crate::models::{to_record, Contributor, RawCommit, RawPullRequest, RepoRef, Repository, UserRef};
use crate::store::{EntityStore, EntityType, Record};

const SEED_CHUNK: usize = 10_000;

/// 2024-01-01T00:00:00Z, the base of every fixture timestamp.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

fn user(id: u64) -> UserRef {
    UserRef {
        id,
        login: format!("user{id}"),
        avatar_url: None,
    }
}

/// A pull request on `acme/widgets` authored by `author`.
///
/// It is merged when `merged_by` is set and has one commit per entry of
/// `commit_authors`.
#[must_use]
pub fn pull_request(github_id: u64, author: u64, merged_by: Option<u64>, commit_authors: &[u64]) -> RawPullRequest {
    let created_at = epoch();
    let updated_at = created_at + Duration::hours(1);
    RawPullRequest {
        github_id,
        number: github_id,
        title: format!("Change #{github_id}"),
        state: if merged_by.is_some() { "closed" } else { "open" }.to_string(),
        repository: RepoRef {
            id: 1,
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        },
        user: user(author),
        merged_by: merged_by.map(user),
        merged_at: merged_by.map(|_| updated_at),
        created_at,
        updated_at,
        additions: 10,
        deletions: 2,
        commits: commit_authors
            .iter()
            .enumerate()
            .map(|(i, author)| RawCommit {
                sha: format!("{github_id}-{i}"),
                message: format!("commit {i}"),
                author: Some(user(*author)),
                authored_at: created_at,
                additions: 5,
                deletions: 1,
            })
            .collect(),
        processed: false,
    }
}

async fn seed(store: &dyn EntityStore, entity: EntityType, records: Vec<Record>) -> Result<(), StoreError> {
    for chunk in records.chunks(SEED_CHUNK) {
        store.upsert(entity, chunk.to_vec()).await?;
    }
    Ok(())
}

/// Seeds repositories `owner{i}/repo{i}` for `i` in `0..count`.
///
/// # Errors
///
/// Returns an error if the store rejects the records.
pub async fn seed_repositories(store: &dyn EntityStore, count: u64) -> Result<(), StoreError> {
    let records = (0..count)
        .map(|i| {
            let owner = format!("owner{i}");
            let name = format!("repo{i}");
            to_record(&Repository {
                github_id: i,
                full_name: format!("{owner}/{name}"),
                owner,
                name,
                description: None,
                stars: None,
                forks: None,
                language: None,
                is_enriched: false,
                updated_at: epoch() + Duration::seconds(i64::try_from(i).unwrap_or(i64::MAX)),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    seed(store, EntityType::Repository, records).await
}

/// Seeds contributors `user{i}` for `i` in `0..count`.
///
/// # Errors
///
/// Returns an error if the store rejects the records.
pub async fn seed_contributors(store: &dyn EntityStore, count: u64) -> Result<(), StoreError> {
    let records = (0..count)
        .map(|i| {
            let updated_at = epoch() + Duration::seconds(i64::try_from(i).unwrap_or(i64::MAX));
            to_record(&Contributor::from_ref(&user(i), updated_at))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    seed(store, EntityType::Contributor, records).await
}
