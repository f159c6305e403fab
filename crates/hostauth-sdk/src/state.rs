//! Observable authentication state

use crate::api::Profile;
use tokio::sync::watch;

/// Snapshot of the session the host application renders from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<Profile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    /// True until the first restore attempt resolves
    pub initializing: bool,
    pub refreshing_token: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user: None,
            is_authenticated: false,
            is_loading: false,
            initializing: true,
            refreshing_token: false,
        }
    }
}

impl SessionState {
    /// Whether a blocking loading indicator should be shown
    pub fn show_loader(&self) -> bool {
        self.initializing || (self.is_loading && !self.is_authenticated)
    }

    /// Drop credentials and user, keeping the loading flags
    pub(crate) fn clear_credentials(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user = None;
        self.is_authenticated = false;
    }
}

/// Broadcast value: subscribers see the current value first, then every change
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        let mut rx = self.tx.subscribe();
        // New subscribers treat the current value as unseen
        rx.mark_changed();
        rx
    }

    /// Mutate in place; receivers are woken before this returns
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut out = None;
        self.tx.send_modify(|value| out = Some(f(value)));
        match out {
            Some(out) => out,
            None => unreachable!("send_modify always runs the closure"),
        }
    }

    /// Read through the borrow without cloning
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
