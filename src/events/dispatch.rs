//! In-process publish/subscribe dispatcher.
//!
//! Handlers are registered per [`EventKind`]. Emitting an event enqueues one job
//! per registered handler on a shared queue; a fixed pool of worker tasks drains
//! the queue for the dispatcher's lifetime, so at most `worker_count` handlers
//! run at once.
//!
//! ```text
//!                                ┌──► worker 0 ──► handler(event)
//! emit(event) ──► job queue ─────┼──► worker 1 ──► handler(event)
//!   (returns once queued)        └──► worker N ──► handler(event)
//! ```
//!
//! Delivery is best-effort and in-memory. Handler errors and panics are logged
//! by the worker and never reach the emitter; the worker keeps serving.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::event::{Event, EventKind};

/// Errors returned to emitters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher has been shut down.
    #[error("event dispatcher is closed")]
    Closed,
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// An asynchronous event subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> HandlerFuture + Send + Sync,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(move |event| -> HandlerFuture { Box::pin(f(event)) }))
}

struct Job {
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
    event: Event,
}

/// Publish/subscribe dispatcher backed by a persistent worker pool.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
    queue: mpsc::UnboundedSender<Job>,
    closed: AtomicBool,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl EventDispatcher {
    /// Spawns `worker_count` workers (at least one). Must be called within a
    /// tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        Self::new_with_shutdown(worker_count, CancellationToken::new())
    }

    /// Like [`EventDispatcher::new`], with workers stopping when `shutdown` fires.
    pub fn new_with_shutdown(worker_count: usize, shutdown: CancellationToken) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let cancel = shutdown.child_token();

        let workers: Vec<_> = (0..worker_count)
            .map(|id| tokio::spawn(run_worker(id, rx.clone(), cancel.clone())))
            .collect();

        info!(worker_count, "Event dispatcher started");

        EventDispatcher {
            handlers: RwLock::new(HashMap::new()),
            queue: tx,
            closed: AtomicBool::new(false),
            cancel,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Subscribes `handler` to events of `kind`.
    pub async fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind).or_default().push(handler);
        debug!(kind = %kind, count = handlers[&kind].len(), "Handler registered");
    }

    /// Number of handlers subscribed to `kind`.
    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues `event` for every handler of its kind.
    ///
    /// Returns the number of jobs queued; handlers have not necessarily run yet.
    #[instrument(skip(self, event), fields(kind = %event.kind()))]
    pub async fn emit(&self, event: Event) -> Result<usize> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        let kind = event.kind();
        let handlers = self
            .handlers
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            warn!("No handler registered, event dropped");
            return Ok(0);
        }

        let mut queued = 0;
        for handler in handlers {
            let job = Job {
                kind,
                handler,
                event: event.clone(),
            };
            self.queue.send(job).map_err(|_| DispatchError::Closed)?;
            queued += 1;
        }

        debug!(queued, "Event queued");
        Ok(queued)
    }

    /// Stops accepting events and stops the worker pool.
    ///
    /// Handlers still running are aborted; queued jobs are discarded.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down event dispatcher");
        self.cancel.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut queue = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = queue.recv() => job,
            }
        };
        let Some(job) = job else { break };

        let Job {
            kind,
            handler,
            event,
        } = job;
        let mut task = tokio::spawn(async move { handler.handle(event).await });

        tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                break;
            }
            outcome = &mut task => match outcome {
                Ok(Ok(())) => debug!(worker = id, kind = %kind, "Handler finished"),
                Ok(Err(e)) => warn!(worker = id, kind = %kind, error = %e, "Handler failed"),
                Err(e) if e.is_panic() => error!(worker = id, kind = %kind, "Handler panicked"),
                Err(e) => warn!(worker = id, kind = %kind, error = %e, "Handler task cancelled"),
            },
        }
    }
    debug!(worker = id, "Dispatcher worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn counting_handler(counter: Arc<AtomicUsize>, done: Arc<Notify>) -> Arc<dyn EventHandler> {
        handler_fn(move |_event| {
            let counter = counter.clone();
            let done = done.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                done.notify_one();
                Ok(())
            }
        })
    }

    async fn wait_for(counter: &AtomicUsize, target: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < target {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handlers did not run in time");
    }

    // ─── Routing ───

    #[tokio::test]
    async fn delivers_to_every_handler_of_the_kind() {
        let dispatcher = EventDispatcher::new(2);
        let monitor_runs = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());

        dispatcher
            .register(
                EventKind::StartMonitor,
                counting_handler(monitor_runs.clone(), notify.clone()),
            )
            .await;
        dispatcher
            .register(
                EventKind::StartMonitor,
                counting_handler(monitor_runs.clone(), notify.clone()),
            )
            .await;

        let queued = dispatcher.emit(Event::StartMonitor).await.unwrap();
        assert_eq!(queued, 2);
        wait_for(&monitor_runs, 2).await;
        assert_eq!(dispatcher.handler_count(EventKind::StartMonitor).await, 2);
    }

    #[tokio::test]
    async fn other_kinds_are_not_delivered() {
        let dispatcher = EventDispatcher::new(1);
        let add_runs = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register(
                EventKind::AddCommit,
                counting_handler(add_runs.clone(), Arc::new(Notify::new())),
            )
            .await;

        assert_eq!(dispatcher.emit(Event::StartMonitor).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(add_runs.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.handler_count(EventKind::StartMonitor).await, 0);
    }

    // ─── Pool Behaviour ───

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let dispatcher = EventDispatcher::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let (a, p, f) = (active.clone(), peak.clone(), finished.clone());
        dispatcher
            .register(
                EventKind::StartMonitor,
                handler_fn(move |_| {
                    let (active, peak, finished) = (a.clone(), p.clone(), f.clone());
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await;

        for _ in 0..12 {
            dispatcher.emit(Event::StartMonitor).await.unwrap();
        }
        wait_for(&finished, 12).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_kill_workers() {
        let dispatcher = EventDispatcher::new(1);
        let runs = Arc::new(AtomicUsize::new(0));

        dispatcher
            .register(
                EventKind::StartMonitor,
                handler_fn(|_| async { Err::<(), _>(anyhow::anyhow!("boom")) }),
            )
            .await;
        dispatcher
            .register(
                EventKind::StartMonitor,
                handler_fn(|_| async {
                    if true {
                        panic!("handler bug");
                    }
                    Ok(())
                }),
            )
            .await;
        dispatcher
            .register(
                EventKind::StartMonitor,
                counting_handler(runs.clone(), Arc::new(Notify::new())),
            )
            .await;

        assert_eq!(dispatcher.emit(Event::StartMonitor).await.unwrap(), 3);
        assert_eq!(dispatcher.emit(Event::StartMonitor).await.unwrap(), 3);
        wait_for(&runs, 2).await;
    }

    // ─── Shutdown ───

    #[tokio::test]
    async fn emit_after_shutdown_is_closed() {
        let dispatcher = EventDispatcher::new(2);
        dispatcher.shutdown().await;
        assert!(dispatcher.is_closed());
        assert_eq!(
            dispatcher.emit(Event::StartMonitor).await,
            Err(DispatchError::Closed)
        );
        // Idempotent.
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_aborts_running_handlers() {
        let token = CancellationToken::new();
        let dispatcher = EventDispatcher::new_with_shutdown(1, token.clone());
        let started = Arc::new(Notify::new());
        let s = started.clone();
        dispatcher
            .register(
                EventKind::StartMonitor,
                handler_fn(move |_| {
                    let s = s.clone();
                    async move {
                        s.notify_one();
                        std::future::pending::<()>().await;
                        Ok(())
                    }
                }),
            )
            .await;

        dispatcher.emit(Event::StartMonitor).await.unwrap();
        started.notified().await;

        tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
            .await
            .expect("shutdown must not wait for a stuck handler");
    }

    #[tokio::test]
    async fn zero_workers_is_clamped_to_one() {
        let dispatcher = EventDispatcher::new(0);
        assert_eq!(dispatcher.worker_count(), 1);
    }
}
