//! Single-flight job dispatcher.
//!
//! At most one job per scraper name is queued or running at a time; jobs for
//! different names run concurrently as tokio tasks. Jobs live in memory only.
//!
//! Lifecycle: `queued -> running -> finished | cancelled | error`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("A job for '{0}' is already queued or running")]
    AlreadyActive(String),

    #[error("No job for '{0}'")]
    NotFound(String),

    #[error("Unknown scraper: {0}")]
    UnknownScraper(String),
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Run,
    Preview,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Run => "run",
            JobKind::Preview => "preview",
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag shared between the dispatcher and a job.
///
/// Jobs poll it at safe points, such as between pages or documents.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a runnable gets to know about its job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub scraper_name: String,
    pub run_id: Uuid,
    pub kind: JobKind,
    pub dry_run: bool,
    pub max_pages: Option<usize>,
    pub cancel: CancelToken,
}

/// Future produced by a runnable. The JSON value becomes the job result.
pub type JobFuture = BoxFuture<'static, anyhow::Result<serde_json::Value>>;

/// Work handed to the dispatcher.
pub type Runnable = Box<dyn FnOnce(JobContext) -> JobFuture + Send>;

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub scraper_name: String,
    pub run_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub dry_run: bool,
    pub max_pages: Option<usize>,
    pub cancel_requested: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancelToken,
    status_tx: watch::Sender<JobStatus>,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

fn lock(jobs: &JobTable) -> MutexGuard<'_, HashMap<String, JobEntry>> {
    // A panic while holding the lock leaves the table itself intact.
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process job table keyed by scraper name.
#[derive(Clone, Default)]
pub struct JobDispatcher {
    jobs: JobTable,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job and spawn it on the current tokio runtime.
    ///
    /// Fails with [`DispatchError::AlreadyActive`] if a job for `name` is
    /// queued or running. A terminal job for the same name is replaced.
    pub fn enqueue(
        &self,
        name: &str,
        runnable: Runnable,
        kind: JobKind,
        dry_run: bool,
        max_pages: Option<usize>,
    ) -> Result<JobSnapshot, DispatchError> {
        let run_id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let snapshot = JobSnapshot {
            scraper_name: name.to_string(),
            run_id: run_id.to_string(),
            kind,
            status: JobStatus::Queued,
            dry_run,
            max_pages,
            cancel_requested: false,
            result: None,
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        {
            let mut jobs = lock(&self.jobs);
            if let Some(existing) = jobs.get(name) {
                if existing.snapshot.status.is_active() {
                    return Err(DispatchError::AlreadyActive(name.to_string()));
                }
            }
            let (status_tx, _) = watch::channel(JobStatus::Queued);
            jobs.insert(
                name.to_string(),
                JobEntry {
                    snapshot: snapshot.clone(),
                    cancel: cancel.clone(),
                    status_tx,
                },
            );
        }

        debug!("Queued {} job {} for {}", kind.as_str(), run_id, name);

        let ctx = JobContext {
            scraper_name: name.to_string(),
            run_id,
            kind,
            dry_run,
            max_pages,
            cancel,
        };
        tokio::spawn(execute(self.jobs.clone(), ctx, runnable));

        Ok(snapshot)
    }

    /// Request cooperative cancellation. False if no active job exists.
    pub fn cancel(&self, name: &str) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(name) {
            Some(entry) if entry.snapshot.status.is_active() => {
                entry.cancel.cancel();
                entry.snapshot.cancel_requested = true;
                info!("Cancellation requested for {}", name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<JobSnapshot> {
        lock(&self.jobs).get(name).map(|entry| entry.snapshot.clone())
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        lock(&self.jobs).get(name).map(|entry| entry.snapshot.status)
    }

    /// All known jobs, sorted by scraper name.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = lock(&self.jobs)
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.scraper_name.cmp(&b.scraper_name));
        snapshots
    }

    /// Forget a terminal job. Active jobs are left alone.
    pub fn drop_job(&self, name: &str) -> bool {
        let mut jobs = lock(&self.jobs);
        match jobs.get(name) {
            Some(entry) if entry.snapshot.status.is_terminal() => {
                jobs.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Wait until the current job for `name` reaches a terminal state.
    pub async fn wait(&self, name: &str) -> Result<JobSnapshot, DispatchError> {
        let mut rx = lock(&self.jobs)
            .get(name)
            .map(|entry| entry.status_tx.subscribe())
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;

        while rx.borrow_and_update().is_active() {
            if rx.changed().await.is_err() {
                // Entry replaced or dropped; whatever is there now is the answer.
                break;
            }
        }

        self.get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))
    }
}

/// Apply `update` to the entry for this run, if it is still in the table.
fn update_entry(jobs: &JobTable, ctx: &JobContext, update: impl FnOnce(&mut JobSnapshot)) {
    let mut jobs = lock(jobs);
    if let Some(entry) = jobs.get_mut(&ctx.scraper_name) {
        if entry.snapshot.run_id == ctx.run_id.to_string() {
            update(&mut entry.snapshot);
            entry.status_tx.send_replace(entry.snapshot.status);
        }
    }
}

async fn execute(jobs: JobTable, ctx: JobContext, runnable: Runnable) {
    if ctx.cancel.is_cancelled() {
        update_entry(&jobs, &ctx, |job| {
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
        });
        info!("{} job for {} cancelled before start", ctx.kind.as_str(), ctx.scraper_name);
        return;
    }

    update_entry(&jobs, &ctx, |job| {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
    });

    let task_ctx = ctx.clone();
    // Inner task so a panicking runnable surfaces as a JoinError.
    let outcome = tokio::spawn(async move { runnable(task_ctx).await }).await;
    let cancelled = ctx.cancel.is_cancelled();

    update_entry(&jobs, &ctx, |job| {
        job.finished_at = Some(Utc::now());
        match outcome {
            Ok(Ok(value)) => {
                job.status = if cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Finished
                };
                job.result = Some(value);
            }
            Ok(Err(e)) => {
                job.status = JobStatus::Error;
                job.error = Some(format!("{:#}", e));
            }
            Err(join_error) => {
                job.status = JobStatus::Error;
                job.error = Some(if join_error.is_panic() {
                    "job panicked".to_string()
                } else {
                    format!("job aborted: {}", join_error)
                });
            }
        }
    });

    match lock(&jobs).get(&ctx.scraper_name).map(|e| (e.snapshot.status, e.snapshot.error.clone())) {
        Some((JobStatus::Error, error)) => warn!(
            "{} job for {} failed: {}",
            ctx.kind.as_str(),
            ctx.scraper_name,
            error.unwrap_or_default()
        ),
        Some((status, _)) => info!("{} job for {} {}", ctx.kind.as_str(), ctx.scraper_name, status),
        None => {}
    }
}
