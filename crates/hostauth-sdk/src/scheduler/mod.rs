//! Refresh scheduling
//!
//! [`adaptive_offset`] decides how long to wait; [`RefreshScheduler`] decides
//! how to wait. While the app is visible a tokio timer is enough. Once it
//! is backgrounded the wait is handed to the platform job service, which
//! may run it late or in a fresh process.

mod job;
mod timer;

pub use job::{Backoff, BackgroundJobScheduler, BackgroundJobs, JobRequest, JobWork, TokioJobRunner};
pub use timer::ForegroundTimer;

use crate::config::RefreshSettings;
use crate::lifecycle::AppLifecycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Job id used for the background refresh
pub const REFRESH_JOB_ID: &str = "hostauth.refresh_token";

/// Emitted when a scheduled refresh is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSignal {
    ForegroundTimer,
    BackgroundJob,
}

/// A scheduled refresh that has come due
///
/// The background job waits for [`report`](Self::report) so the platform
/// can retry a refresh that failed for lack of network.
#[derive(Debug)]
pub struct DueRefresh {
    pub signal: RefreshSignal,
    outcome: Option<oneshot::Sender<bool>>,
}

impl DueRefresh {
    pub(crate) fn timer() -> Self {
        Self {
            signal: RefreshSignal::ForegroundTimer,
            outcome: None,
        }
    }

    pub(crate) fn job() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let due = Self {
            signal: RefreshSignal::BackgroundJob,
            outcome: Some(tx),
        };
        (due, rx)
    }

    /// Tell the mechanism that fired whether it needs to run again
    pub fn report(self, succeeded: bool) {
        if let Some(outcome) = self.outcome {
            // The job may have been cancelled by the refresh it triggered
            let _ = outcome.send(succeeded);
        }
    }
}

/// Something that fires a single refresh signal after a delay
pub trait Scheduler: Send + Sync {
    /// Arm for `offset`, replacing whatever was armed before
    fn schedule(&self, offset: Duration);

    /// Idempotent
    fn cancel(&self);
}

/// Delay before the next proactive refresh of a token expiring at `expiry_secs`
///
/// Long-lived tokens wait `ratio` of their remaining lifetime. Tokens inside
/// the minimum window refresh right away; the result is never negative.
pub fn adaptive_offset(expiry_secs: u64, now_ms: u64, settings: &RefreshSettings) -> Duration {
    // exp comes straight from the server and may be any u64
    let expiry_ms = i64::try_from(expiry_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    let now_ms = i64::try_from(now_ms).unwrap_or(i64::MAX);
    let remaining = expiry_ms.saturating_sub(now_ms);
    let min_window = i64::try_from(settings.min_window_ms).unwrap_or(i64::MAX);

    let offset_ms = if remaining > min_window {
        (remaining as f64 * settings.ratio) as i64
    } else {
        remaining.saturating_sub(min_window).max(0)
    };
    Duration::from_millis(offset_ms.max(0) as u64)
}

/// Picks the timer or the background job based on app visibility
pub struct RefreshScheduler {
    lifecycle: AppLifecycle,
    foreground: ForegroundTimer,
    background: BackgroundJobScheduler,
}

impl RefreshScheduler {
    /// Build a scheduler and the channel its signals arrive on
    pub fn new(
        lifecycle: AppLifecycle,
        jobs: Arc<dyn BackgroundJobs>,
        settings: &RefreshSettings,
    ) -> (Self, mpsc::UnboundedReceiver<DueRefresh>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backoff = Backoff::Linear(Duration::from_secs(settings.job_backoff_secs));
        let scheduler = Self {
            lifecycle,
            foreground: ForegroundTimer::new(tx.clone()),
            background: BackgroundJobScheduler::new(jobs, tx, backoff),
        };
        (scheduler, rx)
    }

    /// Whether either mechanism has something armed
    pub fn is_armed(&self) -> bool {
        self.foreground.is_armed() || self.background.is_armed()
    }
}

impl Scheduler for RefreshScheduler {
    fn schedule(&self, offset: Duration) {
        // One outstanding schedule at most
        self.cancel();
        if self.lifecycle.is_foreground() {
            debug!(offset_ms = offset.as_millis() as u64, "Arming foreground refresh timer");
            self.foreground.schedule(offset);
        } else {
            debug!(offset_ms = offset.as_millis() as u64, "Submitting background refresh job");
            self.background.schedule(offset);
        }
    }

    fn cancel(&self) {
        self.foreground.cancel();
        self.background.cancel();
    }
}
