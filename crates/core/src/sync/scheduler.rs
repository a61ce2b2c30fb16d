//! Single-worker job queue and the periodic tick.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::coordinator::{CycleKind, CycleStatus, SyncCoordinator};
use super::state::ProfileState;
use crate::errors::{Error, ErrorKind, Result};

/// Tick cadence in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;

/// Work executed one item at a time by the sync worker.
#[derive(Debug)]
pub enum SyncJob {
    Cycle {
        kind: CycleKind,
        done: Option<oneshot::Sender<bool>>,
    },
    Persist {
        done: Option<oneshot::Sender<bool>>,
    },
    RefreshLabels {
        done: Option<oneshot::Sender<bool>>,
    },
    /// Persist once more and stop.
    Shutdown {
        done: Option<oneshot::Sender<bool>>,
    },
}

/// Sending side of the worker queue. Counts jobs queued or running.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    sender: mpsc::UnboundedSender<SyncJob>,
    pending: Arc<AtomicUsize>,
}

impl SyncQueue {
    pub fn submit(&self, job: SyncJob) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::WorkerStopped
        })
    }

    /// Queues a job and returns the receiver of its completion signal.
    pub fn submit_with_signal(
        &self,
        make_job: impl FnOnce(Option<oneshot::Sender<bool>>) -> SyncJob,
    ) -> Result<oneshot::Receiver<bool>> {
        let (done, receiver) = oneshot::channel();
        self.submit(make_job(Some(done)))?;
        Ok(receiver)
    }

    /// True when no job is queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving side: owns the coordinator and runs jobs in arrival order.
pub struct SyncWorker {
    coordinator: SyncCoordinator,
    state: Arc<ProfileState>,
    jobs: mpsc::UnboundedReceiver<SyncJob>,
    pending: Arc<AtomicUsize>,
}

impl SyncWorker {
    pub fn new(coordinator: SyncCoordinator, state: Arc<ProfileState>) -> (Self, SyncQueue) {
        let (sender, jobs) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = Self {
            coordinator,
            state,
            jobs,
            pending: Arc::clone(&pending),
        };
        (worker, SyncQueue { sender, pending })
    }

    pub async fn run(mut self) {
        debug!("[ProfileSync] Worker started");
        while let Some(job) = self.jobs.recv().await {
            let stop = matches!(job, SyncJob::Shutdown { .. });
            let (done, ok) = self.handle(job).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
            signal(done, ok);
            if stop {
                self.jobs.close();
                break;
            }
        }
        info!("[ProfileSync] Worker stopped");
    }

    async fn handle(&mut self, job: SyncJob) -> (Option<oneshot::Sender<bool>>, bool) {
        match job {
            SyncJob::Cycle { kind, done } => (done, self.cycle(&kind).await),
            SyncJob::Persist { done } | SyncJob::Shutdown { done } => (done, self.persist()),
            SyncJob::RefreshLabels { done } => {
                let ok = match self.coordinator.refresh_labels(&self.state).await {
                    Ok(updated) => updated,
                    Err(e) => {
                        log_failure("Labels refresh", &e);
                        false
                    }
                };
                (done, ok)
            }
        }
    }

    async fn cycle(&mut self, kind: &CycleKind) -> bool {
        match self.coordinator.run_cycle(kind, &self.state).await {
            Ok(mut report) => {
                if report.status == CycleStatus::Completed {
                    debug!(
                        "[ProfileSync] Cycle complete added={} set={} events={} profile_changed={}",
                        report.added, report.set, report.events, report.profile_changed
                    );
                }
                if matches!(kind, CycleKind::Interactions { .. }) {
                    self.state
                        .install_handlers(std::mem::take(&mut report.interactions));
                }
                true
            }
            Err(e) => {
                log_failure("Sync cycle", &e);
                false
            }
        }
    }

    fn persist(&mut self) -> bool {
        match self.coordinator.persist(&self.state) {
            Ok(()) => true,
            Err(e) => {
                warn!("[ProfileStore] Persist incomplete: {}", e);
                false
            }
        }
    }
}

/// Periodic body: queue a persist when something is dirty and a plain cycle when there is
/// something to deliver and the worker is idle.
pub fn tick(state: &ProfileState, queue: &SyncQueue) -> Result<()> {
    let idle = queue.is_idle();
    if state.needs_persist() {
        queue.submit(SyncJob::Persist { done: None })?;
    }
    if idle && (state.update_required() || state.has_pending_entries()) {
        queue.submit(SyncJob::Cycle {
            kind: CycleKind::Plain {
                refresh_cache: false,
            },
            done: None,
        })?;
    }
    Ok(())
}

fn signal(done: Option<oneshot::Sender<bool>>, ok: bool) {
    if let Some(done) = done {
        let _ = done.send(ok);
    }
}

fn log_failure(what: &str, error: &Error) {
    match error.kind() {
        ErrorKind::Connectivity => debug!("[ProfileSync] {} skipped: {}", what, error),
        _ => warn!("[ProfileSync] {} failed: {}", what, error),
    }
}
