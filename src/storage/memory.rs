//! In-memory storage.
//!
//! Mirrors the SQLite adapter's semantics. Test builds can inject write
//! failures to exercise how callers react to a storage outage.

use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{Result, Storage, StorageError};
use crate::types::{
    AuthorCommitCount, Commit, NewCommit, NewRepository, RowRange, RepoName, Repository,
    RepositoryId, Sha,
};

#[derive(Default)]
struct Tables {
    repositories: BTreeMap<i64, Repository>,
    commits: BTreeMap<i64, Commit>,
    next_repo_id: i64,
    next_commit_id: i64,
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_upserts: AtomicBool,
    #[cfg(test)]
    fail_checkpoints: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStorage {
    /// Makes every subsequent `upsert_commits` fail until reset.
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `advance_checkpoint` fail until reset.
    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }
}

fn page<T: Clone>(items: &[T], range: RowRange) -> Vec<T> {
    let offset = usize::try_from(range.offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(range.limit).unwrap_or(usize::MAX);
    items.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_repository(&self, repo: NewRepository) -> Result<Repository> {
        let mut tables = self.tables.lock().await;
        if tables
            .repositories
            .values()
            .any(|r| r.full_name == repo.full_name)
        {
            return Err(StorageError::Conflict(format!(
                "repository {} already exists",
                repo.full_name
            )));
        }

        tables.next_repo_id += 1;
        let stored = Repository {
            id: RepositoryId(tables.next_repo_id),
            full_name: repo.full_name,
            metadata: repo.metadata,
            fetched_at: repo.fetched_at,
            last_commit_sha: Sha::empty(),
        };
        tables.repositories.insert(stored.id.0, stored.clone());
        Ok(stored)
    }

    async fn find_repository(&self, full_name: &RepoName) -> Result<Option<Repository>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .repositories
            .values()
            .find(|r| &r.full_name == full_name)
            .cloned())
    }

    async fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        Ok(self.tables.lock().await.repositories.get(&id.0).cloned())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self
            .tables
            .lock()
            .await
            .repositories
            .values()
            .cloned()
            .collect())
    }

    async fn advance_checkpoint(
        &self,
        id: RepositoryId,
        expected: &Sha,
        next: &Sha,
    ) -> Result<bool> {
        #[cfg(test)]
        {
            if self.fail_checkpoints.load(Ordering::SeqCst) {
                return Err(StorageError::BackendMessage(
                    "injected checkpoint failure".to_string(),
                ));
            }
        }

        let mut tables = self.tables.lock().await;
        let repo = tables
            .repositories
            .get_mut(&id.0)
            .ok_or_else(|| StorageError::NotFound(format!("repository {id}")))?;
        if &repo.last_commit_sha != expected {
            return Ok(false);
        }
        repo.last_commit_sha = next.clone();
        Ok(true)
    }

    async fn upsert_commits(&self, commits: &[NewCommit]) -> Result<u64> {
        #[cfg(test)]
        {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(StorageError::BackendMessage(
                    "injected upsert failure".to_string(),
                ));
            }
        }

        let mut tables = self.tables.lock().await;
        if let Some(orphan) = commits
            .iter()
            .find(|c| !tables.repositories.contains_key(&c.repo_id.0))
        {
            return Err(StorageError::NotFound(format!("repository {}", orphan.repo_id)));
        }
        let now = Utc::now();
        for commit in commits {
            let existing = tables
                .commits
                .values_mut()
                .find(|c| c.hash == commit.hash);
            match existing {
                Some(stored) => {
                    stored.message = commit.message.clone();
                    stored.author = commit.author.clone();
                    stored.author_email = commit.author_email.clone();
                    stored.date = commit.date;
                    stored.url = commit.url.clone();
                    stored.updated_at = now;
                }
                None => {
                    tables.next_commit_id += 1;
                    let id = tables.next_commit_id;
                    tables.commits.insert(
                        id,
                        Commit {
                            id,
                            repo_id: commit.repo_id,
                            hash: commit.hash.clone(),
                            message: commit.message.clone(),
                            author: commit.author.clone(),
                            author_email: commit.author_email.clone(),
                            date: commit.date,
                            url: commit.url.clone(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }
        Ok(commits.len() as u64)
    }

    async fn find_commit(&self, hash: &Sha) -> Result<Option<Commit>> {
        let tables = self.tables.lock().await;
        Ok(tables.commits.values().find(|c| &c.hash == hash).cloned())
    }

    async fn count_commits(&self) -> Result<u64> {
        Ok(self.tables.lock().await.commits.len() as u64)
    }

    async fn commits_for_repository(
        &self,
        id: RepositoryId,
        range: RowRange,
    ) -> Result<Vec<Commit>> {
        let tables = self.tables.lock().await;
        let mut commits: Vec<Commit> = tables
            .commits
            .values()
            .filter(|c| c.repo_id == id)
            .cloned()
            .collect();
        commits.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(page(&commits, range))
    }

    async fn top_commit_authors(&self, range: RowRange) -> Result<Vec<AuthorCommitCount>> {
        let tables = self.tables.lock().await;
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for commit in tables.commits.values() {
            *counts.entry(commit.author.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<AuthorCommitCount> = counts
            .into_iter()
            .map(|(author, commit_count)| AuthorCommitCount {
                author: author.to_string(),
                commit_count,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.commit_count
                .cmp(&a.commit_count)
                .then_with(|| a.author.cmp(&b.author))
        });
        Ok(page(&ranked, range))
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    #[tokio::test]
    async fn duplicate_repository_conflicts() {
        contract::duplicate_repository_conflicts(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn find_repository_by_name() {
        contract::find_repository_by_name(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        contract::upsert_is_idempotent(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn checkpoint_is_compare_and_set() {
        contract::checkpoint_is_compare_and_set(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn listings_are_paginated() {
        contract::listings_are_paginated(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn upsert_rejects_unknown_repository() {
        contract::upsert_rejects_unknown_repository(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn injected_failures_leave_state_untouched() {
        let storage = MemoryStorage::new();
        let repo = storage
            .create_repository(contract::new_repo("octo/faulty"))
            .await
            .unwrap();

        storage.fail_upserts(true);
        assert!(
            storage
                .upsert_commits(&[contract::new_commit(repo.id, "f1", "Eve", 1)])
                .await
                .is_err()
        );
        assert_eq!(storage.count_commits().await.unwrap(), 0);

        storage.fail_checkpoints(true);
        assert!(
            storage
                .advance_checkpoint(repo.id, &Sha::empty(), &Sha::new("f1"))
                .await
                .is_err()
        );
        let stored = storage.get_repository(repo.id).await.unwrap().unwrap();
        assert!(stored.last_commit_sha.is_empty());
    }
}
