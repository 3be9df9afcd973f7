//! Gate that holds requests back while the client's first request or a
//! re-login is outstanding.

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    FirstInFlight,
    LoginInFlight,
}

#[derive(Debug, Default)]
struct GateInner {
    first_started: bool,
    first_completed: bool,
    login_running: bool,
    /// Parked calls, released most recent first.
    pending: Vec<oneshot::Sender<()>>,
}

impl GateInner {
    fn is_blocked(&self) -> bool {
        (self.first_started && !self.first_completed) || self.login_running
    }

    fn take_released(&mut self) -> Vec<oneshot::Sender<()>> {
        if self.is_blocked() {
            Vec::new()
        } else {
            std::mem::take(&mut self.pending)
        }
    }
}

#[derive(Debug, Default)]
pub struct DeferralQueue {
    inner: Mutex<GateInner>,
}

impl DeferralQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        let inner = self.inner.lock();
        if inner.first_started && !inner.first_completed {
            GateState::FirstInFlight
        } else if inner.login_running {
            GateState::LoginInFlight
        } else {
            GateState::Idle
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Run `work` once the gate allows it.
    ///
    /// The first call of the client's life runs straight away and closes the
    /// gate until it settles. Settling includes the future being dropped.
    pub async fn run<F: Future>(&self, work: F) -> F::Output {
        if let Some(waiter) = self.enter() {
            // A dropped sender only happens with the queue itself, run anyway.
            let _ = waiter.await;
        }
        let _settle = Settle { queue: self };
        work.await
    }

    pub(crate) fn begin_login(&self) {
        self.inner.lock().login_running = true;
    }

    pub(crate) fn end_login(&self) {
        let released = {
            let mut inner = self.inner.lock();
            inner.login_running = false;
            inner.take_released()
        };
        Self::release(released);
    }

    fn enter(&self) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.inner.lock();
        if inner.is_blocked() {
            let (tx, rx) = oneshot::channel();
            inner.pending.push(tx);
            trace!(pending = inner.pending.len(), "Deferring request");
            Some(rx)
        } else {
            inner.first_started = true;
            None
        }
    }

    fn settle(&self) {
        let released = {
            let mut inner = self.inner.lock();
            inner.first_completed = true;
            inner.take_released()
        };
        Self::release(released);
    }

    fn release(mut released: Vec<oneshot::Sender<()>>) {
        if !released.is_empty() {
            trace!(count = released.len(), "Releasing deferred requests");
        }
        while let Some(tx) = released.pop() {
            let _ = tx.send(());
        }
    }
}

struct Settle<'a> {
    queue: &'a DeferralQueue,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        self.queue.settle();
    }
}
