//! Scheduler: polls the queue and hands claimed jobs to a fixed set of workers.
//!
//! Several schedulers, in one process or many, may drain the same database.
//! The store's atomic claim is what keeps two workers off the same job; the
//! per-worker idle flag only keeps one scheduler from over-claiming.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::worker::JobPipeline;
use crate::database::repositories::JobRepository;
use crate::domain::Job;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Workers owned by one scheduler.
    pub workers: usize,
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every worker was busy.
    NoIdleWorker,
    QueueEmpty,
    Dispatched { job_id: i64, worker: usize },
    /// The claim or the hand-off failed; the worker was released.
    Failed,
}

/// Poll-side handle on a worker.
struct WorkerSlot {
    index: usize,
    idle: Arc<AtomicBool>,
    jobs: mpsc::Sender<Job>,
}

impl WorkerSlot {
    /// Atomically flip idle to busy.
    fn try_reserve(&self) -> bool {
        self.idle
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.idle.store(true, Ordering::Release);
    }
}

pub struct Scheduler {
    id: usize,
    config: SchedulerConfig,
    jobs: Arc<dyn JobRepository>,
    pipeline: Arc<JobPipeline>,
    idle: Vec<Arc<AtomicBool>>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(
        id: usize,
        config: SchedulerConfig,
        jobs: Arc<dyn JobRepository>,
        pipeline: Arc<JobPipeline>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let idle = (0..config.workers.max(1))
            .map(|_| Arc::new(AtomicBool::new(true)))
            .collect();
        Self {
            id,
            config,
            jobs,
            pipeline,
            idle,
            cancellation_token,
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers and the poll loop.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!(scheduler_id = self.id, "Scheduler already stopped");
            return;
        };

        info!(
            scheduler_id = self.id,
            workers = self.idle.len(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting scheduler"
        );

        let mut slots = Vec::with_capacity(self.idle.len());
        for (index, idle) in self.idle.iter().enumerate() {
            let (tx, rx) = mpsc::channel(1);
            slots.push(WorkerSlot {
                index,
                idle: Arc::clone(idle),
                jobs: tx,
            });
            join_set.spawn(worker_loop(
                format!("{}-{}", self.id, index),
                rx,
                Arc::clone(idle),
                Arc::clone(&self.pipeline),
                self.cancellation_token.clone(),
            ));
        }

        join_set.spawn(poll_loop(
            self.id,
            slots,
            Arc::clone(&self.jobs),
            self.config.poll_interval,
            self.cancellation_token.clone(),
        ));
    }

    /// Stop polling and wait for workers to finish their current job.
    pub async fn stop(&self) {
        info!(scheduler_id = self.id, "Stopping scheduler");
        self.cancellation_token.cancel();

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!(scheduler_id = self.id, "Scheduler stopped");
    }

    pub fn idle_workers(&self) -> usize {
        self.idle
            .iter()
            .filter(|idle| idle.load(Ordering::Acquire))
            .count()
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

async fn poll_loop(
    scheduler_id: usize,
    slots: Vec<WorkerSlot>,
    jobs: Arc<dyn JobRepository>,
    poll_interval: Duration,
    cancellation_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!(scheduler_id, "Poll loop shutting down");
                break;
            }
            _ = interval.tick() => {
                let outcome = dispatch_once(scheduler_id, &slots, jobs.as_ref()).await;
                if let Dispatch::Dispatched { job_id, worker } = outcome {
                    debug!(scheduler_id, job_id, worker, "Dispatched job");
                }
            }
        }
    }
}

/// One poll tick: reserve an idle worker, claim the oldest pending job, hand
/// it over.
async fn dispatch_once(scheduler_id: usize, slots: &[WorkerSlot], jobs: &dyn JobRepository) -> Dispatch {
    let Some(slot) = slots.iter().find(|slot| slot.try_reserve()) else {
        return Dispatch::NoIdleWorker;
    };

    let claimed = match jobs.claim_oldest_pending().await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => {
            slot.release();
            return Dispatch::QueueEmpty;
        }
        Err(e) => {
            slot.release();
            warn!(scheduler_id, "Failed to claim job: {}", e);
            return Dispatch::Failed;
        }
    };

    let job_id = claimed.id;
    let job = match Job::try_from(claimed) {
        Ok(job) => job,
        Err(e) => {
            slot.release();
            error!(scheduler_id, job_id, "Claimed job is unreadable, leaving it for the reaper: {}", e);
            return Dispatch::Failed;
        }
    };

    if let Err(e) = slot.jobs.try_send(job) {
        slot.release();
        error!(scheduler_id, job_id, "Failed to hand job to worker, leaving it for the reaper: {}", e);
        return Dispatch::Failed;
    }

    Dispatch::Dispatched {
        job_id,
        worker: slot.index,
    }
}

async fn worker_loop(
    worker_id: String,
    mut jobs: mpsc::Receiver<Job>,
    idle: Arc<AtomicBool>,
    pipeline: Arc<JobPipeline>,
    cancellation_token: CancellationToken,
) {
    debug!(worker_id = %worker_id, "Worker started");

    loop {
        // A job already handed over is run even if shutdown has begun.
        let job = tokio::select! {
            biased;
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = cancellation_token.cancelled() => break,
        };

        info!(worker_id = %worker_id, job_id = job.id, slug = %job.slug, "Worker picked up job");
        run_job(&worker_id, &pipeline, job).await;
        idle.store(true, Ordering::Release);
    }

    debug!(worker_id = %worker_id, "Worker shutting down");
}

/// Run one job on its own task so a panic in the pipeline ends the job, not
/// the worker.
async fn run_job(worker_id: &str, pipeline: &Arc<JobPipeline>, job: Job) {
    let task = {
        let pipeline = Arc::clone(pipeline);
        let worker_id = worker_id.to_string();
        let job = job.clone();
        // Errors are already recorded on the job.
        tokio::spawn(async move { pipeline.run(&worker_id, &job).await.ok() })
    };

    if let Err(e) = task.await {
        error!(worker_id, job_id = job.id, slug = %job.slug, "Job task aborted: {}", e);
        pipeline.record_abort(worker_id, &job, &e.to_string()).await;
    }
}
