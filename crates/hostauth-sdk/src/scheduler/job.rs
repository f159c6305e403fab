use super::{DueRefresh, Scheduler, REFRESH_JOB_ID};
use crate::error::AuthResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Retry policy the platform applies when a job run fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear(Duration),
    Exponential(Duration),
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential(base) => {
                base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            }
        }
    }
}

/// A durable job handed to the platform scheduler
///
/// The platform may run it anywhere between `min_latency` and `deadline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub id: String,
    pub min_latency: Duration,
    pub deadline: Duration,
    pub backoff: Backoff,
}

/// Body of a job; resolves to false when the platform should retry with backoff
pub type JobWork = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Platform job service (WorkManager, BGTaskScheduler, ...)
pub trait BackgroundJobs: Send + Sync {
    /// Submit a job, replacing any pending job with the same id
    fn submit(&self, request: JobRequest, work: JobWork) -> AuthResult<()>;

    fn cancel(&self, id: &str);
}

/// [`Scheduler`] backed by the platform job service
pub struct BackgroundJobScheduler {
    jobs: Arc<dyn BackgroundJobs>,
    tx: mpsc::UnboundedSender<DueRefresh>,
    backoff: Backoff,
    armed: Arc<AtomicBool>,
}

impl BackgroundJobScheduler {
    pub fn new(
        jobs: Arc<dyn BackgroundJobs>,
        tx: mpsc::UnboundedSender<DueRefresh>,
        backoff: Backoff,
    ) -> Self {
        Self {
            jobs,
            tx,
            backoff,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submitted and not yet run, or waiting to be retried
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl Scheduler for BackgroundJobScheduler {
    fn schedule(&self, offset: Duration) {
        let request = JobRequest {
            id: REFRESH_JOB_ID.to_string(),
            min_latency: offset / 2,
            deadline: offset,
            backoff: self.backoff,
        };

        let tx = self.tx.clone();
        let armed = self.armed.clone();
        let work: JobWork = Arc::new(move || {
            let tx = tx.clone();
            let armed = armed.clone();
            async move {
                armed.store(false, Ordering::Release);
                let (due, outcome) = DueRefresh::job();
                // A closed channel means nobody is left to refresh; retrying won't help
                if tx.send(due).is_err() {
                    return true;
                }
                let succeeded = outcome.await.unwrap_or(true);
                if !succeeded {
                    armed.store(true, Ordering::Release);
                }
                succeeded
            }
            .boxed()
        });

        match self.jobs.submit(request, work) {
            Ok(()) => self.armed.store(true, Ordering::Release),
            Err(e) => warn!(error = %e, "Failed to submit background refresh job"),
        }
    }

    fn cancel(&self) {
        // Unconditional: a job mid-run or between retries is not armed
        if self.armed.swap(false, Ordering::AcqRel) {
            debug!("Cancelling background refresh job");
        }
        self.jobs.cancel(REFRESH_JOB_ID);
    }
}

/// In-process [`BackgroundJobs`] for hosts without an OS job service
///
/// Runs each job at its minimum latency and applies the backoff when the
/// work asks to be retried.
#[derive(Debug, Default)]
pub struct TokioJobRunner {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    max_attempts: u32,
}

impl TokioJobRunner {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Number of jobs waiting to run
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl BackgroundJobs for TokioJobRunner {
    fn submit(&self, request: JobRequest, work: JobWork) -> AuthResult<()> {
        let max_attempts = self.max_attempts.max(1);
        let id = request.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(request.min_latency).await;
            for attempt in 1..=max_attempts {
                if work().await {
                    return;
                }
                if attempt < max_attempts {
                    tokio::time::sleep(request.backoff.delay(attempt)).await;
                }
            }
            warn!(id = %request.id, max_attempts, "Background job gave up");
        });

        if let Some(previous) = self.handles.lock().insert(id, handle) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, id: &str) {
        if let Some(handle) = self.handles.lock().remove(id) {
            handle.abort();
        }
    }
}

impl Drop for TokioJobRunner {
    fn drop(&mut self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }
}
