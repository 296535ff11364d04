use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("gave up waiting after {0:?}")]
    TimedOut(Duration),

    #[error("wait cancelled")]
    Cancelled,

    #[error("object disappeared while waiting for it to settle")]
    Gone,

    #[error(transparent)]
    Fetch(#[from] ApiError),
}

/// Fixed-interval polling against eventually-consistent remote state.
///
/// Every wait carries a deadline and a cancellation token; a remote
/// operation that never settles surfaces as [`WaitError::TimedOut`] instead
/// of blocking the run forever. A fetch error aborts the wait — the
/// operation is abandoned, not retried.
#[derive(Debug, Clone)]
pub struct Waiter {
    interval: Duration,
    deadline: Duration,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(interval: Duration, deadline: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            deadline,
            cancel,
        }
    }

    /// Polls until `is_terminal` holds. `poll` returning `Ok(None)` means
    /// the entity vanished while we were waiting for it to settle, which is
    /// an error on this path.
    pub async fn until<T, F, Fut>(
        &self,
        mut poll: F,
        is_terminal: impl Fn(&T) -> bool,
    ) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ApiError>>,
    {
        let started = Instant::now();
        loop {
            let Some(state) = poll().await? else {
                return Err(WaitError::Gone);
            };
            if is_terminal(&state) {
                return Ok(state);
            }
            self.pause(started).await?;
        }
    }

    /// Removal confirmation: polls until the entity is gone (`Ok(None)`
    /// from `poll` means the delete succeeded) or until it settles in a
    /// terminal state while still present, returned as `Ok(Some(state))`
    /// for the caller to judge.
    pub async fn until_gone<T, F, Fut>(
        &self,
        mut poll: F,
        is_terminal: impl Fn(&T) -> bool,
    ) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, ApiError>>,
    {
        let started = Instant::now();
        loop {
            match poll().await? {
                None => return Ok(None),
                Some(state) if is_terminal(&state) => return Ok(Some(state)),
                Some(_) => {}
            }
            self.pause(started).await?;
        }
    }

    async fn pause(&self, started: Instant) -> Result<(), WaitError> {
        if started.elapsed() + self.interval > self.deadline {
            return Err(WaitError::TimedOut(self.deadline));
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(WaitError::Cancelled),
            _ = sleep(self.interval) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SnapshotStatus;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Script = Arc<Mutex<VecDeque<Result<Option<SnapshotStatus>, ApiError>>>>;

    fn script(
        states: impl IntoIterator<Item = Result<Option<SnapshotStatus>, ApiError>>,
    ) -> Script {
        Arc::new(Mutex::new(states.into_iter().collect()))
    }

    fn next(script: &Script) -> Result<Option<SnapshotStatus>, ApiError> {
        script
            .lock()
            .expect("script lock")
            .pop_front()
            .expect("script exhausted")
    }

    fn waiter() -> Waiter {
        Waiter::new(
            Duration::from_millis(10),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_waits_for_terminal_state() {
        let states = script([
            Ok(Some(SnapshotStatus::Locked)),
            Ok(Some(SnapshotStatus::Locked)),
            Ok(Some(SnapshotStatus::Ok)),
        ]);

        let state = waiter()
            .until(|| {
                let states = states.clone();
                async move { next(&states) }
            }, SnapshotStatus::is_terminal)
            .await
            .expect("wait");

        assert_eq!(state, SnapshotStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_reports_vanished_entity() {
        let states = script([Ok(Some(SnapshotStatus::Locked)), Ok(None)]);

        let err = waiter()
            .until(|| {
                let states = states.clone();
                async move { next(&states) }
            }, SnapshotStatus::is_terminal)
            .await
            .expect_err("should fail");

        assert!(matches!(err, WaitError::Gone));
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_gone_treats_not_found_as_success() {
        // A delete in flight: present and locked, then the fetch starts
        // reporting not-found.
        let states = script([
            Ok(Some(SnapshotStatus::Locked)),
            Ok(Some(SnapshotStatus::Locked)),
            Ok(None),
        ]);

        let outcome = waiter()
            .until_gone(|| {
                let states = states.clone();
                async move { next(&states) }
            }, SnapshotStatus::is_terminal)
            .await
            .expect("wait");

        assert_eq!(outcome, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_gone_surfaces_stuck_snapshot() {
        let states = script([
            Ok(Some(SnapshotStatus::Locked)),
            Ok(Some(SnapshotStatus::Ok)),
        ]);

        let outcome = waiter()
            .until_gone(|| {
                let states = states.clone();
                async move { next(&states) }
            }, SnapshotStatus::is_terminal)
            .await
            .expect("wait");

        assert_eq!(outcome, Some(SnapshotStatus::Ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_aborts_the_wait() {
        let states = script([
            Ok(Some(SnapshotStatus::Locked)),
            Err(ApiError::Remote {
                status: 500,
                message: "engine unavailable".into(),
            }),
        ]);

        let err = waiter()
            .until(|| {
                let states = states.clone();
                async move { next(&states) }
            }, SnapshotStatus::is_terminal)
            .await
            .expect_err("should fail");

        assert!(matches!(err, WaitError::Fetch(ApiError::Remote { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_produces_timeout() {
        let waiter = Waiter::new(
            Duration::from_secs(10),
            Duration::from_secs(25),
            CancellationToken::new(),
        );

        let err = waiter
            .until(
                || async { Ok(Some(SnapshotStatus::Locked)) },
                SnapshotStatus::is_terminal,
            )
            .await
            .expect_err("should time out");

        assert!(matches!(err, WaitError::TimedOut(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let waiter = Waiter::new(Duration::from_secs(10), Duration::from_secs(600), cancel);

        let err = waiter
            .until(
                || async { Ok(Some(SnapshotStatus::Locked)) },
                SnapshotStatus::is_terminal,
            )
            .await
            .expect_err("should cancel");

        assert!(matches!(err, WaitError::Cancelled));
    }
}
