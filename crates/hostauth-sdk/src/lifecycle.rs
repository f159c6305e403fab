//! Foreground/background transitions reported by the host

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

/// Tracks whether the app is visible
///
/// The host forwards its platform callbacks here. Subscribers are only
/// woken on actual edges, so repeated `on_foreground` calls are harmless.
#[derive(Debug, Clone)]
pub struct AppLifecycle {
    tx: Arc<watch::Sender<AppState>>,
}

impl Default for AppLifecycle {
    fn default() -> Self {
        Self::new(AppState::Foreground)
    }
}

impl AppLifecycle {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> AppState {
        *self.tx.borrow()
    }

    pub fn is_foreground(&self) -> bool {
        self.state() == AppState::Foreground
    }

    pub fn on_foreground(&self) {
        self.transition(AppState::Foreground);
    }

    pub fn on_background(&self) {
        self.transition(AppState::Background);
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    fn transition(&self, next: AppState) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(state = ?next, "App lifecycle transition");
        }
    }
}
