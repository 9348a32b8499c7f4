//! Serialized transcode-job queue.
//!
//! One dispatch loop owns process execution: it picks the oldest queued job,
//! runs it to settlement, and repeats until the queue drains or is stopped.
//! Every arm of the queue stamps a fresh loop; a superseded loop stands down
//! at its next claim, so at most one external process exists at a time.
//!
//! All state lives behind one mutex. Command handlers are synchronous and
//! never hold the lock across an await; the progress path touches only the
//! numeric fields of the active job. Events are emitted while the lock is
//! held so subscribers observe them in mutation order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{QueueConfig, RetryPolicy, StartOptions};
use crate::error::Result;
use crate::progress;
use crate::queue::events::{QueueEvent, QueueState};
use crate::queue::job::{Job, JobSpec, JobStatus};
use crate::runner::{ProcessRunner, RunOutcome};

pub mod events;
pub mod job;

/// One recorded failure, keyed by the media pair rather than the job id so
/// the count survives requeues of the same work.
struct FailureRecord {
    input_path: PathBuf,
    output_path: PathBuf,
}

#[derive(Default)]
struct QueueInner {
    jobs: Vec<Job>,
    active_job_id: Option<String>,
    is_running: bool,
    retry: RetryPolicy,
    failures: Vec<FailureRecord>,
    attempt_cancel: Option<CancellationToken>,
    /// Stamp of the most recently spawned dispatch loop. A loop carrying an
    /// older stamp has been superseded and must stand down.
    dispatch_epoch: u64,
}

impl QueueInner {
    fn snapshot(&self) -> QueueState {
        let mut jobs = self.jobs.clone();
        jobs.sort_by_key(|job| job.status.display_rank());
        QueueState {
            jobs,
            active_job_id: self.active_job_id.clone(),
            is_running: self.is_running,
        }
    }

    fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    fn failure_count(&self, input: &Path, output: &Path) -> usize {
        self.failures
            .iter()
            .filter(|record| record.input_path == input && record.output_path == output)
            .count()
    }

    /// Cancel the running attempt, if any.
    ///
    /// The job flips to canceled immediately, without waiting for the kill
    /// to be acknowledged. The settling path sees the job is no longer
    /// active and leaves it untouched.
    fn cancel_active(&mut self) -> Option<String> {
        if let Some(token) = self.attempt_cancel.take() {
            token.cancel();
        }
        let id = self.active_job_id.take()?;
        if let Some(job) = self.job_mut(&id) {
            job.status = JobStatus::Canceled;
            job.ended_at = Some(Utc::now());
        }
        Some(id)
    }
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueShared {
    /// A send error only means no subscriber is listening.
    fn emit(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state_change(&self, inner: &QueueInner) {
        self.emit(QueueEvent::StateChange {
            state: inner.snapshot(),
        });
    }
}

/// Handle to a transcode queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct TranscodeQueue {
    shared: Arc<QueueShared>,
    runner: Arc<dyn ProcessRunner>,
}

impl TranscodeQueue {
    /// Queue with the default configuration.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self::with_config(runner, QueueConfig::default())
    }

    /// Queue with a specific configuration.
    pub fn with_config(runner: Arc<dyn ProcessRunner>, config: QueueConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(QueueShared {
                inner: Mutex::new(QueueInner::default()),
                event_tx,
            }),
            runner,
        }
    }

    /// Subscribe to queue events. Slow receivers may observe lag.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Add a job to the end of the queue and return its id.
    pub fn add_job(&self, spec: JobSpec) -> String {
        let job = Job::from_spec(spec);
        let id = job.id.clone();
        let mut inner = self.shared.inner.lock();
        debug!("Queued job {} ({})", id, job.input_path.display());
        inner.jobs.push(job);
        self.shared.emit_state_change(&inner);
        id
    }

    /// Remove a job from the tracked set.
    ///
    /// Removing the active job cancels its process first. Returns false
    /// when the id is unknown.
    pub fn remove_job(&self, job_id: &str) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(position) = inner.jobs.iter().position(|job| job.id == job_id) else {
            return false;
        };
        if inner.active_job_id.as_deref() == Some(job_id) {
            inner.cancel_active();
        }
        let job = inner.jobs.remove(position);
        info!("Removed job {} ({})", job.id, job.input_path.display());
        self.shared.emit_state_change(&inner);
        true
    }

    /// Arm the queue and spawn the dispatch loop.
    ///
    /// Must be called from within a Tokio runtime. A second call while
    /// armed is ignored.
    pub fn start(&self, options: StartOptions) {
        let mut inner = self.shared.inner.lock();
        if inner.is_running {
            debug!("Queue already armed");
            return;
        }
        inner.is_running = true;
        inner.retry = options.retry;
        inner.dispatch_epoch += 1;
        let epoch = inner.dispatch_epoch;
        info!("Queue armed (retry enabled: {})", options.retry.enabled);
        self.shared.emit_state_change(&inner);
        drop(inner);
        self.spawn_dispatch(epoch);
    }

    /// Disarm the queue and cancel the running attempt, if any.
    ///
    /// Queued jobs stay queued. Calling stop on an idle queue is a no-op.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        let was_armed = inner.is_running || inner.active_job_id.is_some();
        inner.is_running = false;
        if inner.active_job_id.is_some() {
            inner.cancel_active();
        }
        if was_armed {
            info!("Queue stopped");
            self.shared.emit_state_change(&inner);
        }
    }

    /// Requeue a failed job for another attempt.
    ///
    /// Arms the queue if it is idle. Returns false when the id is unknown
    /// or the job is not in the failed state.
    pub fn retry_job(&self, job_id: &str) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(job) = inner.job_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Failed {
            return false;
        }
        job.reset_for_retry();
        let mut arm_epoch = None;
        if !inner.is_running {
            inner.is_running = true;
            inner.retry = RetryPolicy::default();
            inner.dispatch_epoch += 1;
            arm_epoch = Some(inner.dispatch_epoch);
        }
        info!("Retrying job {}", job_id);
        self.shared.emit_state_change(&inner);
        drop(inner);
        if let Some(epoch) = arm_epoch {
            self.spawn_dispatch(epoch);
        }
        true
    }

    /// Cancel one job, queued or running.
    ///
    /// Returns false when the id is unknown or the job already settled.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.active_job_id.as_deref() == Some(job_id) {
            inner.cancel_active();
            info!("Canceled running job {}", job_id);
            self.shared.emit_state_change(&inner);
            return true;
        }
        let Some(job) = inner.job_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Queued {
            return false;
        }
        job.status = JobStatus::Canceled;
        info!("Canceled queued job {}", job_id);
        self.shared.emit_state_change(&inner);
        true
    }

    /// Stop the queue and drop every tracked job and failure record.
    pub fn clear_queue(&self) {
        self.stop();
        let mut inner = self.shared.inner.lock();
        inner.jobs.clear();
        inner.failures.clear();
        info!("Queue cleared");
        self.shared.emit_state_change(&inner);
    }

    /// Snapshot of the current queue state.
    pub fn get_state(&self) -> QueueState {
        self.shared.inner.lock().snapshot()
    }

    fn spawn_dispatch(&self, epoch: u64) {
        let shared = Arc::clone(&self.shared);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(dispatch_loop(shared, runner, epoch));
    }
}

enum NextStep {
    Run(Attempt),
    Drained,
    Stopped,
}

/// Everything one execution needs, captured while the lock was held.
struct Attempt {
    job_id: String,
    argv: Vec<String>,
    expected_duration_seconds: Option<f64>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

async fn dispatch_loop(shared: Arc<QueueShared>, runner: Arc<dyn ProcessRunner>, epoch: u64) {
    loop {
        match next_attempt(&shared, epoch) {
            NextStep::Run(attempt) => execute_attempt(&shared, runner.as_ref(), attempt).await,
            NextStep::Drained => {
                debug!("Queue drained");
                break;
            }
            NextStep::Stopped => {
                debug!("Queue disarmed");
                break;
            }
        }
    }
}

/// Claim the oldest queued job, or report why there is nothing to run.
fn next_attempt(shared: &QueueShared, epoch: u64) -> NextStep {
    let mut inner = shared.inner.lock();
    // A superseded loop can wake here after its canceled attempt finally
    // settles; it must not claim work owned by the current loop.
    if !inner.is_running || inner.dispatch_epoch != epoch {
        return NextStep::Stopped;
    }
    let Some(job) = inner
        .jobs
        .iter_mut()
        .find(|job| job.status == JobStatus::Queued)
    else {
        inner.is_running = false;
        shared.emit_state_change(&inner);
        return NextStep::Drained;
    };
    let started_at = Utc::now();
    job.status = JobStatus::Running;
    job.started_at = Some(started_at);
    job.ended_at = None;
    let cancel = CancellationToken::new();
    let attempt = Attempt {
        job_id: job.id.clone(),
        argv: job.argv.clone(),
        expected_duration_seconds: job.expected_duration_seconds,
        started_at,
        cancel: cancel.clone(),
    };
    info!("Starting job {} ({})", job.id, job.input_path.display());
    inner.active_job_id = Some(attempt.job_id.clone());
    inner.attempt_cancel = Some(cancel);
    shared.emit_state_change(&inner);
    NextStep::Run(attempt)
}

/// Run one attempt to settlement, consuming diagnostic chunks as they arrive.
async fn execute_attempt(shared: &Arc<QueueShared>, runner: &dyn ProcessRunner, attempt: Attempt) {
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
    let consume = async {
        while let Some(chunk) = chunk_rx.recv().await {
            apply_chunk(
                shared,
                &attempt.job_id,
                attempt.expected_duration_seconds,
                attempt.started_at,
                &chunk,
            );
        }
    };
    let (outcome, ()) = tokio::join!(
        runner.run(&attempt.argv, chunk_tx, attempt.cancel.clone()),
        consume
    );
    settle_attempt(shared, &attempt, outcome);
}

/// Progress-callback path: may touch only the numeric progress fields of
/// the active job.
fn apply_chunk(
    shared: &QueueShared,
    job_id: &str,
    expected_duration_seconds: Option<f64>,
    started_at: DateTime<Utc>,
    chunk: &str,
) {
    let update = progress::extract(chunk, expected_duration_seconds);
    if update.is_empty() {
        return;
    }
    let mut inner = shared.inner.lock();
    // The attempt may have settled or been canceled while the chunk was
    // in flight.
    if inner.active_job_id.as_deref() != Some(job_id) {
        return;
    }
    let Some(job) = inner.job_mut(job_id) else {
        return;
    };
    if job.status != JobStatus::Running {
        return;
    }
    if let Some(percent) = update.percent {
        // Percent never moves backwards within an attempt.
        if percent > job.progress_percent {
            job.progress_percent = percent;
        }
    }
    if let Some(elapsed) = update.elapsed_seconds {
        let wall_seconds = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        job.eta_seconds =
            progress::estimate_eta_seconds(expected_duration_seconds, elapsed, wall_seconds);
    }
    if update.speed.is_some() {
        job.speed_label = update.speed;
    }
    let event = QueueEvent::Progress {
        job_id: job.id.clone(),
        percent: job.progress_percent,
        speed: job.speed_label.clone(),
        eta_seconds: job.eta_seconds,
    };
    shared.emit(event);
}

/// Record the outcome of a finished attempt.
fn settle_attempt(shared: &QueueShared, attempt: &Attempt, outcome: Result<RunOutcome>) {
    let mut inner = shared.inner.lock();
    // A command handler may have already settled this attempt.
    if inner.active_job_id.as_deref() != Some(attempt.job_id.as_str()) {
        return;
    }
    inner.active_job_id = None;
    inner.attempt_cancel = None;
    match outcome {
        Ok(outcome) if outcome.success => {
            if let Some(job) = inner.job_mut(&attempt.job_id) {
                job.status = JobStatus::Completed;
                job.progress_percent = 100.0;
                job.eta_seconds = None;
                job.ended_at = Some(Utc::now());
                info!("Job {} completed", job.id);
            }
            shared.emit_state_change(&inner);
            shared.emit(QueueEvent::JobComplete {
                job_id: attempt.job_id.clone(),
                success: true,
                error: None,
            });
        }
        Ok(outcome) => {
            let error = outcome.error_output.unwrap_or_else(|| match outcome.exit_code {
                Some(code) => format!("process exited with code {}", code),
                None => "process terminated by signal".to_string(),
            });
            fail_or_requeue(shared, &mut inner, &attempt.job_id, error);
        }
        Err(e) => {
            fail_or_requeue(shared, &mut inner, &attempt.job_id, e.to_string());
        }
    }
}

/// Record a failure and either requeue the job or settle it as failed.
fn fail_or_requeue(shared: &QueueShared, inner: &mut QueueInner, job_id: &str, error: String) {
    let Some(position) = inner.jobs.iter().position(|job| job.id == job_id) else {
        return;
    };
    let (input_path, output_path) = {
        let job = &inner.jobs[position];
        (job.input_path.clone(), job.output_path.clone())
    };
    inner.failures.push(FailureRecord {
        input_path: input_path.clone(),
        output_path: output_path.clone(),
    });
    let recorded = inner.failure_count(&input_path, &output_path);
    let policy = inner.retry;
    if policy.enabled && (recorded as u32) < policy.max_retries_per_job {
        warn!(
            "Job {} failed (attempt {} of {}), requeueing: {}",
            job_id, recorded, policy.max_retries_per_job, error
        );
        inner.jobs[position].reset_for_retry();
        shared.emit_state_change(inner);
    } else {
        let job = &mut inner.jobs[position];
        job.status = JobStatus::Failed;
        job.error_message = Some(error.clone());
        job.ended_at = Some(Utc::now());
        error!("Job {} failed: {}", job_id, error);
        shared.emit_state_change(inner);
        shared.emit(QueueEvent::JobComplete {
            job_id: job_id.to_string(),
            success: false,
            error: Some(error),
        });
    }
}
