//! Ties the queue, admission pool, per-agent orchestrator, and task tracker together: dequeue a
//! request, wait for a worker slot, spawn a named worker thread that runs the upgrade, reports
//! its terminal status, and either loops on more queued work or releases its slot (§4.6).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::ManagerConfig;
use crate::error::StageError;
use crate::orchestrator::{self, Stage, UpgradeOutcome};
use crate::pool::{Pool, PopOutcome, RequestQueue};
use crate::protocol::RequestChannel;
use crate::request::{UpgradeRequest, UpgradeTask};
use crate::tracker::TaskTracker;
use crate::validator::{CustomValidator, WpkValidator};

static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Owns the queue and admission pool, and everything a worker needs to run independently of the
/// dispatch loop: configuration, the agent channel, validators, and the task tracker.
pub struct Dispatcher {
    queue: Arc<RequestQueue>,
    pool: Arc<Pool>,
    config: Arc<ManagerConfig>,
    channel: Arc<dyn RequestChannel>,
    wpk_validator: Arc<dyn WpkValidator>,
    custom_validator: Arc<dyn CustomValidator>,
    tracker: Arc<dyn TaskTracker>,
    /// Handles of every worker thread spawned so far. Shutdown joins them all so the process
    /// never exits while a worker is still mid-exchange (§5, "Shutdown").
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ManagerConfig>,
        channel: Arc<dyn RequestChannel>,
        wpk_validator: Arc<dyn WpkValidator>,
        custom_validator: Arc<dyn CustomValidator>,
        tracker: Arc<dyn TaskTracker>,
    ) -> Self {
        Dispatcher {
            queue: Arc::new(RequestQueue::new(config.queue_capacity)),
            pool: Arc::new(Pool::new(config.max_threads)),
            config,
            channel,
            wpk_validator,
            custom_validator,
            tracker,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The producer side: enqueues one request, blocking if the queue is at capacity.
    pub fn enqueue(&self, request: crate::request::UpgradeRequest) {
        self.queue.push(request);
    }

    /// Signals the dispatch loop to stop admitting new work once the queue drains.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Joins every worker thread spawned so far, draining the handle list. Called after the
    /// dispatch loop itself has exited, so no further handles can be added concurrently.
    pub fn join_workers(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if let Err(e) = handle.join() {
                error!(worker = name, panic = ?e, "worker thread panicked and was not caught internally");
            }
        }
    }

    /// Runs the dispatch loop on the calling thread until the queue reports shutdown. Blocks on
    /// `pop_timed` between items so shutdown can be observed promptly.
    pub fn run(&self) {
        loop {
            match self.queue.pop_timed(self.config.pop_timeout) {
                PopOutcome::Item(request) => self.admit_and_spawn(request),
                PopOutcome::Timeout => continue,
                PopOutcome::ShuttingDown => {
                    info!("dispatch loop shutting down, no more work queued");
                    return;
                }
            }
        }
    }

    fn admit_and_spawn(&self, request: crate::request::UpgradeRequest) {
        self.pool.admit();

        let pool = Arc::clone(&self.pool);
        let queue = Arc::clone(&self.queue);
        let config = Arc::clone(&self.config);
        let channel = Arc::clone(&self.channel);
        let wpk_validator = Arc::clone(&self.wpk_validator);
        let custom_validator = Arc::clone(&self.custom_validator);
        let tracker = Arc::clone(&self.tracker);

        let worker_id = WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("upgrade-worker-{worker_id}");

        let spawned = std::thread::Builder::new().name(name.clone()).spawn(move || {
            let mut request = request;
            loop {
                let agent_id = request.agent_id;

                let panicked = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_one(
                        &request,
                        &config,
                        channel.as_ref(),
                        wpk_validator.as_ref(),
                        custom_validator.as_ref(),
                        tracker.as_ref(),
                    )
                }));

                if let Err(payload) = panicked {
                    error!(agent_id, "worker thread panicked mid-upgrade, releasing its slot");
                    let outcome = UpgradeOutcome::Failure {
                        stage: Stage::Upgrade,
                        detail: StageError::WorkerPanicked.to_string(),
                    };
                    if let Err(e) =
                        tracker.report(agent_id, &outcome, None, &config.legacy_version_threshold)
                    {
                        error!(agent_id, error = %e, "failed to report worker panic to task tracker");
                    }
                    drop(payload);
                    break;
                }

                match queue.pop_timed(Duration::from_millis(0)) {
                    PopOutcome::Item(next) => request = next,
                    PopOutcome::Timeout | PopOutcome::ShuttingDown => break,
                }
            }

            pool.release();
        });

        match spawned {
            Ok(handle) => self.workers.lock().unwrap().push(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn worker thread");
                self.pool.release();
            }
        }
    }
}

/// Runs one upgrade to completion and reports its terminal status. Split out of the worker
/// closure so it can be wrapped in `catch_unwind` without fighting the borrow checker over the
/// owned `request` the closure also needs to replace between loop iterations.
fn run_one(
    request: &UpgradeRequest,
    config: &ManagerConfig,
    channel: &dyn RequestChannel,
    wpk_validator: &dyn WpkValidator,
    custom_validator: &dyn CustomValidator,
    tracker: &dyn TaskTracker,
) {
    let agent_id = request.agent_id;
    let agent_version = match &request.task {
        UpgradeTask::Standard { custom_version, .. } => custom_version.clone(),
        UpgradeTask::Custom { .. } => None,
    };

    let outcome = orchestrator::run_upgrade(
        request,
        config,
        channel,
        wpk_validator,
        custom_validator,
    );

    if let UpgradeOutcome::Failure { stage, ref detail } = outcome {
        warn!(agent_id, ?stage, detail = %detail, "upgrade failed");
    }

    if let Err(e) = tracker.report(
        agent_id,
        &outcome,
        agent_version.as_deref(),
        &config.legacy_version_threshold,
    ) {
        error!(agent_id, error = %e, "failed to report terminal status to task tracker");
    }
}
