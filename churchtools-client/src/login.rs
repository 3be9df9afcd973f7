//! Single-flight coordination of re-login attempts.
//!
//! At most one login runs at a time. Everyone who needs a login while one is
//! running awaits that same attempt and sees the same outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::ClientError;

pub type LoginOutcome = Result<(), ClientError>;
pub type SharedLogin = Shared<BoxFuture<'static, LoginOutcome>>;

#[derive(Default)]
pub struct LoginCoordinator {
    current: Mutex<Option<SharedLogin>>,
}

impl std::fmt::Debug for LoginCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCoordinator")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl LoginCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn in_flight(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Join the running login, or start one with `start`.
    ///
    /// `start` is only called when no login is in flight, under the slot
    /// lock, so it must not block. The attempt runs as its own task and
    /// finishes even if every caller stops waiting. Once it is done the slot
    /// is cleared, then `on_settled` runs, then waiters see the outcome.
    pub fn join_or_start<F, S>(self: &Arc<Self>, start: F, on_settled: S) -> SharedLogin
    where
        F: FnOnce() -> BoxFuture<'static, LoginOutcome>,
        S: FnOnce() + Send + 'static,
    {
        let mut slot = self.current.lock();
        if let Some(existing) = slot.as_ref() {
            debug!("Joining login already in flight");
            return existing.clone();
        }

        let attempt = start();
        let this = Arc::clone(self);
        // The task blocks on the slot lock until the new login is stored.
        let task = tokio::spawn(async move {
            let outcome = attempt.await;
            this.current.lock().take();
            on_settled();
            outcome
        });
        let login = async move {
            task.await
                .unwrap_or_else(|e| Err(ClientError::LoginTask(e.to_string())))
        }
        .boxed()
        .shared();
        *slot = Some(login.clone());
        login
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use churchtools_core::ErrorResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let coordinator = LoginCoordinator::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let joins: Vec<SharedLogin> = (0..5)
            .map(|_| {
                let (starts, gate) = (starts.clone(), gate.clone());
                coordinator.join_or_start(
                    move || {
                        starts.fetch_add(1, Ordering::SeqCst);
                        async move {
                            gate.notified().await;
                            Ok(())
                        }
                        .boxed()
                    },
                    || {},
                )
            })
            .collect();

        assert!(coordinator.in_flight());
        gate.notify_one();
        for outcome in futures::future::join_all(joins).await {
            assert!(outcome.is_ok());
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!coordinator.in_flight());
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_slot_cleared() {
        let coordinator = LoginCoordinator::new();
        let failing = || {
            async {
                Err(ClientError::Unauthorized(ErrorResponse::new(
                    401,
                    "https://a/api/whoami",
                    serde_json::Value::Null,
                )))
            }
            .boxed()
        };

        let settled = Arc::new(AtomicUsize::new(0));
        let counter = settled.clone();
        let first = coordinator.join_or_start(failing, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let second = coordinator.join_or_start(|| unreachable!("login already in flight"), || {});
        let (a, b) = futures::join!(first, second);
        assert!(matches!(a, Err(ClientError::Unauthorized(_))));
        assert!(matches!(b, Err(ClientError::Unauthorized(_))));
        assert!(!coordinator.in_flight());
        assert_eq!(settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_completes_without_waiters() {
        let coordinator = LoginCoordinator::new();
        let gate = Arc::new(Notify::new());
        let (settled_tx, settled_rx) = tokio::sync::oneshot::channel();

        let login = {
            let gate = gate.clone();
            coordinator.join_or_start(
                move || {
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                    .boxed()
                },
                move || {
                    let _ = settled_tx.send(());
                },
            )
        };
        drop(login);
        assert!(coordinator.in_flight());

        gate.notify_one();
        settled_rx.await.unwrap();
        assert!(!coordinator.in_flight());
    }

    #[tokio::test]
    async fn test_sequential_logins_start_fresh_attempts() {
        let coordinator = LoginCoordinator::new();
        let starts = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let starts = starts.clone();
            coordinator
                .join_or_start(
                    move || {
                        starts.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }.boxed()
                    },
                    || {},
                )
                .await
                .unwrap();
        }
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }
}
