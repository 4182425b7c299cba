//! Adds a repository to tracking and schedules its first sync.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::error::{IngestError, Result};
use crate::config::Config;
use crate::events::{Event, EventDispatcher};
use crate::github::RemoteApi;
use crate::storage::{Storage, StorageError};
use crate::types::{NewRepository, RepoName, Repository, RepositoryMetadata, SyncWindow};

/// Validates a repository name, records the repository and emits its
/// [`Event::AddCommit`].
///
/// Registration returns as soon as the event is queued; ingestion itself runs
/// on the dispatcher's workers.
#[derive(Clone)]
pub struct RegistrationFlow {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    remote: Arc<dyn RemoteApi>,
    dispatcher: Arc<EventDispatcher>,
}

impl RegistrationFlow {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        remote: Arc<dyn RemoteApi>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            storage,
            remote,
            dispatcher,
        }
    }

    /// Registers `name` (`owner/repo`, surrounding whitespace ignored).
    ///
    /// An already tracked repository keeps its row and checkpoint, so the
    /// emitted sync resumes where the last one stopped.
    #[instrument(skip(self))]
    pub async fn register(&self, name: &str) -> Result<Repository> {
        let name = RepoName::parse(name.trim())?;
        let range = self.config.date_range()?;

        let metadata = self.remote.fetch_repository(&name).await.map_err(|e| {
            warn!(repo = %name, error = %e, "Repository metadata lookup failed");
            IngestError::from(e)
        })?;

        let repository = match self.storage.find_repository(&name).await? {
            Some(existing) => {
                info!(
                    repo = %name,
                    checkpoint = %existing.last_commit_sha.short(),
                    "Repository already tracked, resuming"
                );
                existing
            }
            None => self.create(&name, metadata).await?,
        };

        let window = SyncWindow::new(range, repository.last_commit_sha.clone());
        self.dispatcher
            .emit(Event::add_commit(repository.clone(), window))
            .await?;

        Ok(repository)
    }

    async fn create(
        &self,
        name: &RepoName,
        metadata: RepositoryMetadata,
    ) -> Result<Repository> {
        let new = NewRepository {
            full_name: name.clone(),
            metadata,
            fetched_at: Utc::now(),
        };
        match self.storage.create_repository(new).await {
            Ok(repository) => {
                info!(repo = %name, repo_id = %repository.id, "Repository registered");
                Ok(repository)
            }
            // Lost a race with a concurrent registration of the same name.
            Err(StorageError::Conflict(_)) => self
                .storage
                .find_repository(name)
                .await?
                .ok_or_else(|| IngestError::NotFound(name.full_name())),
            Err(e) => Err(e.into()),
        }
    }
}
