use super::{DueRefresh, Scheduler};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// In-process timer for while the app is visible
///
/// Dies with the process, which is fine: the next foreground edge re-arms it.
#[derive(Debug)]
pub struct ForegroundTimer {
    tx: mpsc::UnboundedSender<DueRefresh>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ForegroundTimer {
    pub fn new(tx: mpsc::UnboundedSender<DueRefresh>) -> Self {
        Self {
            tx,
            handle: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Scheduler for ForegroundTimer {
    fn schedule(&self, offset: Duration) {
        let deadline = Instant::now().checked_add(offset);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                // Past the end of the clock
                None => std::future::pending::<()>().await,
            }
            if tx.send(DueRefresh::timer()).is_err() {
                debug!("Refresh timer fired after the session shut down");
            }
        });

        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ForegroundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
