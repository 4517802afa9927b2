//! Job lifecycle controller
//!
//! Owns the agent's processing status and drives one job at a time:
//! fetch, decode, run the pipeline, report. Polls are triggered by a fixed
//! timer and by `job_created` notifications; both go through the same
//! in-flight guard.

use lumen_client::NextJob;
use lumen_core::domain::job::{Job, JobId, JobResultPayload};
use lumen_core::domain::message::{kind, outbound};
use serde_json::{Map, json};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::progress::{ChannelObserver, Outbox, forward_progress};
use crate::repository::JobRepository;
use crate::service::{PipelineEngine, PipelineReport};
use crate::transport::{DispatchRegistry, handler_fn};

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingStatus {
    Idle,
    Polling,
    Processing { job_id: JobId },
    Completed { job_id: JobId },
    Failed { job_id: JobId, reason: String },
    Error(String),
}

impl ProcessingStatus {
    /// Whether a poll or a job is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Polling | ProcessingStatus::Processing { .. }
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Idle => write!(f, "idle"),
            ProcessingStatus::Polling => write!(f, "polling for jobs"),
            ProcessingStatus::Processing { job_id } => write!(f, "processing job {}", job_id),
            ProcessingStatus::Completed { job_id } => write!(f, "completed job {}", job_id),
            ProcessingStatus::Failed { job_id, reason } => {
                write!(f, "job {} failed: {}", job_id, reason)
            }
            ProcessingStatus::Error(description) => write!(f, "error: {}", description),
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    status: ProcessingStatus,
    last_error: Option<String>,
}

pub struct JobController {
    jobs: Arc<dyn JobRepository>,
    engine: Arc<PipelineEngine>,
    outbox: Outbox,
    poll_interval: Duration,
    state: Mutex<ControllerState>,
}

impl JobController {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        engine: Arc<PipelineEngine>,
        outbox: Outbox,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            engine,
            outbox,
            poll_interval,
            state: Mutex::new(ControllerState {
                status: ProcessingStatus::Idle,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ProcessingStatus {
        self.lock().status.clone()
    }

    fn set_status(&self, status: ProcessingStatus) {
        self.lock().status = status;
    }

    fn record_error(&self, status: ProcessingStatus, description: String) {
        let mut state = self.lock();
        state.status = status;
        state.last_error = Some(description);
    }

    /// Human-readable summary of what the agent is doing
    pub fn status_text(&self) -> String {
        let mode = if self.outbox.is_connected() {
            "connected via push"
        } else {
            "disconnected, polling fallback"
        };

        let state = self.lock();
        let mut text = format!("{} ({})", state.status, mode);
        if let Some(error) = &state.last_error {
            text.push_str(&format!("; last error: {}", error));
        }
        text
    }

    /// Fetches and processes the next job, unless a poll or job is in flight
    pub async fn poll_for_next_job(&self) {
        {
            let mut state = self.lock();
            if state.status.is_busy() {
                debug!("Skipping poll: {}", state.status);
                return;
            }
            state.status = ProcessingStatus::Polling;
        }

        let body = match self.jobs.fetch_next_job().await {
            Ok(NextJob::Empty) => {
                debug!("No job available");
                self.set_status(ProcessingStatus::Idle);
                return;
            }
            Ok(NextJob::Available(body)) => body,
            Err(e) => {
                error!("Failed to fetch next job: {}", e);
                let description = format!("fetch failed: {}", e);
                self.record_error(ProcessingStatus::Error(description.clone()), description);
                return;
            }
        };

        let job = match Job::from_json(&body) {
            Ok(job) => job,
            Err(e) => {
                error!("Discarding job envelope: {} (body: {})", e, body);
                self.record_error(ProcessingStatus::Idle, format!("invalid job: {}", e));
                return;
            }
        };

        self.set_status(ProcessingStatus::Processing {
            job_id: job.id.clone(),
        });
        info!("Processing job {}", job.id);

        let payload = match self.process_job(&job).await {
            Ok(report) => {
                info!(
                    "Job {} completed ({} stages, {} failed operations)",
                    job.id,
                    report.stages.len(),
                    report.failed_operations()
                );
                {
                    let mut state = self.lock();
                    state.status = ProcessingStatus::Completed {
                        job_id: job.id.clone(),
                    };
                    state.last_error = None;
                }
                JobResultPayload::success()
            }
            Err(reason) => {
                warn!("Job {} failed: {}", job.id, reason);
                self.record_error(
                    ProcessingStatus::Failed {
                        job_id: job.id.clone(),
                        reason: reason.clone(),
                    },
                    reason.clone(),
                );
                JobResultPayload::failure(reason)
            }
        };

        if let Err(e) = self.jobs.submit_result(&job.id, &payload).await {
            error!("Failed to submit result for job {}: {}", job.id, e);
        }

        self.finish(&job.id);
    }

    /// Back to idle, unless something else has taken over the status
    fn finish(&self, job_id: &JobId) {
        let mut state = self.lock();
        let done = match &state.status {
            ProcessingStatus::Completed { job_id: id } | ProcessingStatus::Failed { job_id: id, .. } => {
                id == job_id
            }
            _ => false,
        };
        if done {
            state.status = ProcessingStatus::Idle;
        }
    }

    /// Runs the pipeline off the runtime and streams its progress
    async fn process_job(&self, job: &Job) -> Result<PipelineReport, String> {
        let started = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(job.id.clone(), rx, self.outbox.clone()));

        let engine = Arc::clone(&self.engine);
        let config = job.config.clone();
        let run = tokio::task::spawn_blocking(move || {
            let mut observer = ChannelObserver::new(tx);
            engine.run_pipeline(&config, &mut observer)
        });

        let result = match run.await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("pipeline task failed: {}", e)),
        };

        if let Err(e) = forwarder.await {
            warn!("Progress forwarder for job {} failed: {}", job.id, e);
        }

        self.report_outcome(&job.id, &result, started.elapsed().as_secs_f64())
            .await;
        result
    }

    async fn report_outcome(
        &self,
        job_id: &JobId,
        result: &Result<PipelineReport, String>,
        duration: f64,
    ) {
        let id = job_id.as_str();
        let mut metrics = Map::new();
        metrics.insert("job_id".to_string(), json!(id));
        metrics.insert("duration".to_string(), json!(duration));
        metrics.insert("success".to_string(), json!(result.is_ok()));

        match result {
            Ok(report) => {
                metrics.insert("stages".to_string(), json!(report.stages.len()));
                metrics.insert(
                    "failed_operations".to_string(),
                    json!(report.failed_operations()),
                );
                self.outbox
                    .emit(outbound::job_completed(
                        id,
                        true,
                        Some(json!({
                            "photo_id": report.original.as_str(),
                            "edit_target": report.edit_target.as_str(),
                            "stages": report.stages.len(),
                            "failed_operations": report.failed_operations(),
                        })),
                        duration,
                    ))
                    .await;
                self.engine
                    .host()
                    .show_status(&format!("Job {} completed", id));
            }
            Err(reason) => {
                self.outbox
                    .emit(outbound::job_failed(id, Some(json!({"reason": reason})), duration))
                    .await;
                self.outbox
                    .emit(outbound::error_occurred(
                        "job_failed",
                        reason,
                        Some(json!({"job_id": id})),
                        None,
                    ))
                    .await;
                self.engine
                    .host()
                    .show_status(&format!("Job {} failed: {}", id, reason));
            }
        }

        self.outbox.emit(outbound::processing_metrics(metrics)).await;
    }

    /// Polls on the fixed interval and whenever a notification arrives
    pub async fn run(self: Arc<Self>, mut notifications: mpsc::Receiver<()>) {
        info!("Starting job polling (interval: {:?})", self.poll_interval);

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                Some(()) = notifications.recv() => debug!("Job notification received"),
            }

            let controller = Arc::clone(&self);
            tokio::spawn(async move { controller.poll_for_next_job().await });
        }
    }
}

/// Subscribes to `job_created` and returns a coalescing notification channel
///
/// Holds at most one pending notification; a burst of messages while a poll
/// is pending collapses into one.
pub fn job_notifications(registry: &DispatchRegistry) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    registry.add_event_listener(
        kind::JOB_CREATED,
        handler_fn(move |_| {
            let tx = tx.clone();
            async move {
                if tx.try_send(()).is_err() {
                    debug!("Poll already pending, notification coalesced");
                }
                Ok(())
            }
        }),
    );
    rx
}
