//! Wires the dispatcher, orchestrator, registration flow and scheduler together.
//!
//! ```text
//! register ──► AddCommit ──► orchestrator run ──► (monitor idle?) StartMonitor
//!                  ▲                                             │
//!                  └──────── resync_all ◄── scheduler tick ◄─────┘
//! ```
//!
//! Only one run per repository is in flight at a time; an `AddCommit` for a
//! repository that is already syncing is dropped, since the running sync will
//! pick up everything the duplicate would have.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{IngestError, Result};
use super::monitor::MonitoringScheduler;
use super::orchestrator::{IngestionOrchestrator, SyncReport};
use super::registration::RegistrationFlow;
use crate::config::Config;
use crate::events::{Event, EventDispatcher, EventKind, handler_fn};
use crate::github::{CommitFetcher, RemoteApi};
use crate::storage::Storage;
use crate::types::{Repository, RepositoryId, SyncWindow};

/// The running ingestion pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    dispatcher: Arc<EventDispatcher>,
    orchestrator: IngestionOrchestrator,
    registration: RegistrationFlow,
    scheduler: Arc<MonitoringScheduler>,
    in_flight: Mutex<HashSet<RepositoryId>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Removes a repository from the in-flight set on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<RepositoryId>>,
    id: RepositoryId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl Pipeline {
    /// Builds the pipeline and subscribes its handlers. Must be called within a
    /// tokio runtime.
    pub async fn start(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(EventDispatcher::new_with_shutdown(
            config.worker_pool_size,
            shutdown.clone(),
        ));
        let orchestrator = IngestionOrchestrator::new(
            storage.clone(),
            CommitFetcher::new(remote.clone()),
            config.rate_limit_policy(),
        );
        let registration =
            RegistrationFlow::new(config.clone(), storage.clone(), remote, dispatcher.clone());

        let inner = Arc::new(Inner {
            scheduler: Arc::new(MonitoringScheduler::new(config.monitor_interval)),
            config,
            storage,
            dispatcher,
            orchestrator,
            registration,
            in_flight: Mutex::new(HashSet::new()),
            monitor_task: Mutex::new(None),
            shutdown,
        });

        // Handlers hold weak references; the dispatcher lives inside `inner`.
        let weak = Arc::downgrade(&inner);
        inner
            .dispatcher
            .register(
                EventKind::AddCommit,
                handler_fn(move |event| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.on_event(event).await,
                            None => Ok(()),
                        }
                    }
                }),
            )
            .await;

        let weak = Arc::downgrade(&inner);
        inner
            .dispatcher
            .register(
                EventKind::StartMonitor,
                handler_fn(move |event| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.on_event(event).await,
                            None => Ok(()),
                        }
                    }
                }),
            )
            .await;

        info!(
            workers = inner.dispatcher.worker_count(),
            monitor_interval_secs = inner.config.monitor_interval.as_secs(),
            "Ingestion pipeline started"
        );
        Pipeline { inner }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn scheduler(&self) -> &MonitoringScheduler {
        &self.inner.scheduler
    }

    /// Registers a repository and queues its sync. See [`RegistrationFlow::register`].
    pub async fn register_repository(&self, name: &str) -> Result<Repository> {
        self.inner.registration.register(name).await
    }

    /// Queues a sync of every tracked repository from its stored checkpoint.
    ///
    /// Returns the number of repositories scheduled.
    pub async fn resync_all(&self) -> Result<usize> {
        self.inner.resync_all().await
    }

    /// Asks for the monitoring loop to start; a no-op when it already runs.
    pub async fn start_monitoring(&self) -> Result<()> {
        self.inner.dispatcher.emit(Event::StartMonitor).await?;
        Ok(())
    }

    /// Number of repositories currently syncing.
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancels running syncs, stops the dispatcher and waits for the monitoring
    /// loop to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down ingestion pipeline");
        self.inner.shutdown.cancel();
        self.inner.dispatcher.shutdown().await;

        let monitor = self
            .inner
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = monitor {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitoring task ended abnormally");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Inner {
    async fn on_event(self: Arc<Self>, event: Event) -> anyhow::Result<()> {
        match event {
            Event::AddCommit { repository, window } => {
                self.sync(repository, window).await?;
            }
            Event::StartMonitor => self.start_monitor(),
        }
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repository.full_name))]
    async fn sync(&self, repository: Repository, window: SyncWindow) -> Result<Option<SyncReport>> {
        let Some(_guard) = self.claim(repository.id) else {
            info!("Sync already in flight, skipping");
            return Ok(None);
        };

        let report = self
            .orchestrator
            .run(&repository, window, &self.shutdown)
            .await?;

        if !self.scheduler.is_running() {
            self.dispatcher.emit(Event::StartMonitor).await?;
        }
        Ok(Some(report))
    }

    fn claim(&self, id: RepositoryId) -> Option<InFlight<'_>> {
        let claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        claimed.then_some(InFlight {
            set: &self.in_flight,
            id,
        })
    }

    fn start_monitor(self: Arc<Self>) {
        if !self.scheduler.try_start() {
            debug!("Monitoring already running");
            return;
        }

        let scheduler = self.scheduler.clone();
        let cancel = self.shutdown.child_token();
        let weak: Weak<Inner> = Arc::downgrade(&self);
        let task = tokio::spawn(async move {
            scheduler
                .run(cancel, move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.resync_all().await,
                            None => Err(IngestError::Cancelled),
                        }
                    }
                })
                .await;
        });

        *self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    #[instrument(skip(self))]
    async fn resync_all(&self) -> Result<usize> {
        let range = self.config.date_range()?;
        let repositories = self.storage.list_repositories().await?;
        if repositories.is_empty() {
            return Err(IngestError::NotFound("no repository added yet".to_string()));
        }

        let count = repositories.len();
        for repository in repositories {
            let window = SyncWindow::new(range, repository.last_commit_sha.clone());
            self.dispatcher
                .emit(Event::add_commit(repository, window))
                .await?;
        }
        debug!(count, "Re-sync queued");
        Ok(count)
    }
}
