use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::ApiError;

/// What a watcher wants the cache to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Stop,
}

impl RetryAction {
    /// Stock policy: retry anything that may clear up on its own.
    pub fn for_error(error: &ApiError) -> Self {
        if error.is_transient() {
            RetryAction::Retry
        } else {
            RetryAction::Stop
        }
    }
}

/// Why a watcher settled without fresh data.
///
/// A successful fetch settles watchers with no reason at all.
#[derive(Debug, Clone)]
pub enum SettleReason {
    /// Every attached watcher asked to stop after this error
    Failed(Arc<ApiError>),
    /// A fetch for another account (or a restart) replaced the operation
    Superseded,
    /// The cache was shut down or dropped
    ShutDown,
}

type SettledFn = Box<dyn FnOnce(Option<SettleReason>) + Send>;
type ErrorFn = Box<dyn FnMut(&ApiError) -> RetryAction + Send>;

/// A caller's pair of callbacks attached to a fetch.
///
/// `on_settled` runs exactly once, when the fetch the watcher is attached to
/// reaches a terminal outcome. `on_error` runs once per failed attempt while
/// the watcher is attached and decides whether the caller wants a retry.
pub struct FetchWatcher {
    on_settled: SettledFn,
    on_error: ErrorFn,
}

impl FetchWatcher {
    pub fn new<S, E>(on_settled: S, on_error: E) -> Self
    where
        S: FnOnce(Option<SettleReason>) + Send + 'static,
        E: FnMut(&ApiError) -> RetryAction + Send + 'static,
    {
        Self {
            on_settled: Box::new(on_settled),
            on_error: Box::new(on_error),
        }
    }

    /// Watcher whose settlement is delivered through a oneshot channel.
    pub fn channel<E>(on_error: E) -> (Self, oneshot::Receiver<Option<SettleReason>>)
    where
        E: FnMut(&ApiError) -> RetryAction + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let watcher = Self::new(
            move |reason| {
                // Receiver gone means the caller stopped waiting
                let _ = tx.send(reason);
            },
            on_error,
        );
        (watcher, rx)
    }

    pub(crate) fn error(&mut self, error: &ApiError) -> RetryAction {
        (self.on_error)(error)
    }

    pub(crate) fn settle(self, reason: Option<SettleReason>) {
        (self.on_settled)(reason)
    }
}

impl fmt::Debug for FetchWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchWatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_action_for_error() {
        assert_eq!(
            RetryAction::for_error(&ApiError::ServerError("down".into())),
            RetryAction::Retry
        );
        assert_eq!(
            RetryAction::for_error(&ApiError::InvalidAccount("nope".into())),
            RetryAction::Stop
        );
    }

    #[tokio::test]
    async fn test_channel_watcher_delivers_settlement() {
        let (mut watcher, rx) = FetchWatcher::channel(|_| RetryAction::Stop);
        assert_eq!(watcher.error(&ApiError::RateLimited), RetryAction::Stop);
        watcher.settle(Some(SettleReason::Superseded));
        assert!(matches!(rx.await, Ok(Some(SettleReason::Superseded))));
    }
}
