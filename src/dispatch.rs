//! Bounded worker pool for accepted commits
//!
//! Webhook handlers reserve a queue slot first and only then record the
//! commit in the ledger, so a full queue turns into a retryable 503 instead
//! of a silently dropped commit. Each dispatched commit gets a completion
//! receiver; nobody has to await it, and every task logs its own outcome.
//! On shutdown, intake stops and queued plus in-flight commits are given a
//! grace period to finish.

use crate::config::Config;
use crate::error::{DispatchError, SyncError};
use crate::pipeline::CommitHandler;
use crate::types::{CommitRef, CommitReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Terminal result of one commit task
pub type CommitOutcome = Result<CommitReport, SyncError>;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.dispatch.queue_capacity.max(1),
            max_concurrent: config.dispatch.max_concurrent_commits.max(1),
        }
    }
}

struct Job {
    commit: CommitRef,
    done: oneshot::Sender<CommitOutcome>,
}

/// Cloneable intake side of the pool
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    shutdown: CancellationToken,
}

/// A reserved queue slot; dropping it releases the slot
pub struct DispatchPermit {
    permit: mpsc::OwnedPermit<Job>,
}

/// Owner side of the pool, used to shut it down
pub struct DispatcherHandle {
    shutdown: CancellationToken,
    worker: tokio::task::JoinHandle<bool>,
}

impl Dispatcher {
    /// Start the pool on the current runtime
    pub fn start(
        handler: Arc<dyn CommitHandler>,
        settings: DispatchSettings,
        grace: Duration,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));

        let worker = tokio::spawn(run(rx, handler, semaphore, shutdown.clone(), grace));

        tracing::info!(
            queue_capacity = settings.queue_capacity,
            max_concurrent = settings.max_concurrent,
            "Commit dispatcher started"
        );

        (
            Self {
                tx,
                shutdown: shutdown.clone(),
            },
            DispatcherHandle { shutdown, worker },
        )
    }

    /// Reserve a queue slot without waiting
    pub fn try_reserve(&self) -> Result<DispatchPermit, DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Closed);
        }
        match self.tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(DispatchPermit { permit }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Commits waiting for a worker
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

impl DispatchPermit {
    /// Queue `commit`; the receiver resolves when its task finishes
    pub fn dispatch(self, commit: CommitRef) -> oneshot::Receiver<CommitOutcome> {
        let (done, rx) = oneshot::channel();
        tracing::debug!(commit = %commit.short_hash(), "Commit queued");
        self.permit.send(Job { commit, done });
        rx
    }
}

impl DispatcherHandle {
    /// Stop intake and wait up to the grace period for queued and in-flight
    /// commits; returns false if tasks had to be aborted
    pub async fn shutdown(self) -> bool {
        self.shutdown.cancel();
        match self.worker.await {
            Ok(drained) => drained,
            Err(e) => {
                tracing::error!(error = %e, "Dispatcher worker failed");
                false
            }
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<Job>,
    handler: Arc<dyn CommitHandler>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    grace: Duration,
) -> bool {
    let mut tasks = JoinSet::new();

    loop {
        while let Some(joined) = tasks.try_join_next() {
            log_join(joined);
        }

        // Wait for a free worker first, so backlog stays in the bounded queue
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        tasks.spawn(run_job(handler.clone(), job, permit));
    }

    rx.close();
    tracing::info!(
        in_flight = tasks.len(),
        grace_secs = grace.as_secs(),
        "Dispatcher draining"
    );

    let drained = tokio::time::timeout(grace, async {
        while let Some(job) = rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            tasks.spawn(run_job(handler.clone(), job, permit));
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    })
    .await
    .is_ok();

    if drained {
        tracing::info!("Dispatcher drained");
    } else {
        tracing::warn!(
            aborted = tasks.len(),
            "Shutdown grace period elapsed, aborting remaining commits"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
    drained
}

async fn run_job(handler: Arc<dyn CommitHandler>, job: Job, _permit: OwnedSemaphorePermit) {
    let hash = job.commit.hash.clone();
    let outcome = handler.handle(job.commit).await;

    match &outcome {
        Ok(report) => tracing::info!(
            commit = %hash,
            changed = report.changed_paths,
            uploaded = report.uploads.uploaded.len(),
            failed = report.uploads.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Commit processed"
        ),
        Err(e) => tracing::error!(commit = %hash, error = %e, "Commit processing aborted"),
    }

    // Nobody may be listening
    let _ = job.done.send(outcome);
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        tracing::error!(error = %e, "Commit task panicked");
    }
}
