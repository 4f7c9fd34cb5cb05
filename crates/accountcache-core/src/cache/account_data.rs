use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::models::{AccountData, AccountNumber};

use super::backoff::Backoff;
use super::watcher::{FetchWatcher, RetryAction, SettleReason};

/// Delay before re-fetching an account that was already expired when fetched.
/// Picks up a payment within a minute without polling harder than that.
pub const DEFAULT_EXPIRED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Accounts expiring within this window get a re-fetch scheduled at expiry.
pub const DEFAULT_REFRESH_HORIZON_HOURS: i64 = 24;

/// Lower bound for any retry or refresh delay, whatever the options say.
pub const MIN_REFETCH_DELAY: Duration = Duration::from_secs(1);

/// Source of account data, usually the HTTP API.
pub trait AccountFetcher: Send + Sync + 'static {
    fn fetch_account(
        &self,
        account: &AccountNumber,
    ) -> BoxFuture<'static, Result<AccountData, ApiError>>;
}

impl<F, Fut> AccountFetcher for F
where
    F: Fn(AccountNumber) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AccountData, ApiError>> + Send + 'static,
{
    fn fetch_account(
        &self,
        account: &AccountNumber,
    ) -> BoxFuture<'static, Result<AccountData, ApiError>> {
        Box::pin(self(account.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub backoff: Backoff,
    pub expired_refresh_interval: Duration,
    pub refresh_horizon: chrono::Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            expired_refresh_interval: DEFAULT_EXPIRED_REFRESH_INTERVAL,
            refresh_horizon: chrono::Duration::hours(DEFAULT_REFRESH_HORIZON_HOURS),
        }
    }
}

impl CacheOptions {
    /// How long to wait before re-fetching `data`, or `None` if it stays fresh.
    fn refresh_delay(&self, data: &AccountData, now: DateTime<Utc>) -> Option<Duration> {
        let delay = if data.is_expired_at(now) {
            self.expired_refresh_interval
        } else if data.expires_within(self.refresh_horizon, now) {
            data.time_until_expiry(now).to_std().ok()?
        } else {
            return None;
        };
        Some(delay.max(MIN_REFETCH_DELAY))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt).max(MIN_REFETCH_DELAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fetching,
    RetryPending,
}

struct Operation {
    account: AccountNumber,
    generation: u64,
    attempt: u32,
    phase: Phase,
    /// Running attempt or armed retry timer
    task: Option<AbortHandle>,
    watchers: Vec<FetchWatcher>,
}

#[derive(Default)]
struct CacheState {
    /// Bumped whenever an operation starts or the cache shuts down.
    generation: u64,
    operation: Option<Operation>,
    refresh_timer: Option<AbortHandle>,
    shut_down: bool,
    /// Set while a failed operation's watchers run `on_error` outside the lock
    error_fanout: bool,
    /// An operation started during the error fan-out waits for it to finish
    start_deferred: bool,
}

impl CacheState {
    fn current_mut(&mut self, generation: u64, phase: Phase) -> Option<&mut Operation> {
        self.operation
            .as_mut()
            .filter(|op| op.generation == generation && op.phase == phase)
    }

    fn is_current(&self, generation: u64, phase: Phase) -> bool {
        self.operation
            .as_ref()
            .is_some_and(|op| op.generation == generation && op.phase == phase)
    }
}

struct Inner {
    fetcher: Box<dyn AccountFetcher>,
    on_update: Box<dyn Fn(&AccountData) + Send + Sync>,
    options: CacheOptions,
    state: Mutex<CacheState>,
}

/// Fetches account data on behalf of many callers.
///
/// At most one fetch is in flight at a time. Callers asking for the account
/// already being fetched share that fetch; asking for another account
/// supersedes it. Failed attempts are retried with backoff as long as one
/// attached watcher asks for it, and records that are expired or close to
/// expiry are re-fetched in the background.
///
/// Clones share the same cache. Dropping the last clone tears it down.
/// `fetch` spawns onto the current tokio runtime.
#[derive(Clone)]
pub struct AccountDataCache {
    inner: Arc<Inner>,
}

impl AccountDataCache {
    pub fn new<F, U>(fetcher: F, on_update: U) -> Self
    where
        F: AccountFetcher,
        U: Fn(&AccountData) + Send + Sync + 'static,
    {
        Self::with_options(fetcher, on_update, CacheOptions::default())
    }

    pub fn with_options<F, U>(fetcher: F, on_update: U, options: CacheOptions) -> Self
    where
        F: AccountFetcher,
        U: Fn(&AccountData) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                fetcher: Box::new(fetcher),
                on_update: Box::new(on_update),
                options,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Request fresh account data for `account`.
    ///
    /// Never fails synchronously; the outcome reaches `watcher`.
    pub fn fetch(&self, account: &AccountNumber, watcher: FetchWatcher) {
        let mut state = self.inner.state();

        if state.shut_down {
            drop(state);
            warn!(account = %account, "Fetch requested after cache shutdown");
            watcher.settle(Some(SettleReason::ShutDown));
            return;
        }

        if let Some(op) = state.operation.as_mut().filter(|op| &op.account == account) {
            op.watchers.push(watcher);
            debug!(
                account = %account,
                watchers = op.watchers.len(),
                "Attached to pending account fetch"
            );

            if op.phase == Phase::RetryPending {
                // A caller asking again replaces the scheduled retry
                if let Some(timer) = op.task.take() {
                    timer.abort();
                }
                op.phase = Phase::Fetching;
                op.task = Some(self.inner.spawn_attempt(account.clone(), op.generation));
                info!(account = %account, attempt = op.attempt + 1, "Retrying account fetch early");
            }
            return;
        }

        self.inner.start_operation(state, account.clone(), vec![watcher]);
    }

    /// Cancel all pending work and settle every waiting watcher.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether a fetch or a scheduled retry is outstanding
    pub fn is_fetching(&self) -> bool {
        self.inner.state().operation.is_some()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Callbacks never run under the lock, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace whatever is in flight with a new operation for `account`.
    fn start_operation(
        self: &Arc<Self>,
        mut state: MutexGuard<'_, CacheState>,
        account: AccountNumber,
        watchers: Vec<FetchWatcher>,
    ) {
        state.generation += 1;
        let generation = state.generation;

        if let Some(timer) = state.refresh_timer.take() {
            timer.abort();
        }

        let previous = state.operation.replace(Operation {
            account: account.clone(),
            generation,
            attempt: 0,
            phase: Phase::Fetching,
            task: None,
            watchers,
        });
        if let Some(task) = previous.as_ref().and_then(|op| op.task.as_ref()) {
            task.abort();
        }
        // The failing operation still owns watchers that must settle first
        let deferred = state.error_fanout;
        if deferred {
            state.start_deferred = true;
        }
        drop(state);

        if let Some(previous) = previous {
            info!(
                previous = %previous.account,
                account = %account,
                "Superseding pending account fetch"
            );
            for watcher in previous.watchers {
                watcher.settle(Some(SettleReason::Superseded));
            }
        }

        if deferred {
            debug!(account = %account, generation, "Deferring account fetch until error callbacks finish");
            return;
        }

        debug!(account = %account, generation, "Starting account fetch");
        let task = self.spawn_attempt(account, generation);

        let mut state = self.state();
        if let Some(op) = state.operation.as_mut() {
            if op.generation == generation && op.task.is_none() {
                op.task = Some(task);
            }
        }
    }

    /// Start the attempt of an operation created during an error fan-out.
    fn start_deferred_attempt(self: &Arc<Self>) {
        let mut state = self.state();
        let Some(op) = state.operation.as_mut() else { return };
        if op.phase != Phase::Fetching || op.task.is_some() {
            return;
        }
        debug!(account = %op.account, generation = op.generation, "Starting account fetch");
        op.task = Some(self.spawn_attempt(op.account.clone(), op.generation));
    }

    fn spawn_attempt(self: &Arc<Self>, account: AccountNumber, generation: u64) -> AbortHandle {
        tokio::spawn(Self::run_attempt(Arc::downgrade(self), account, generation)).abort_handle()
    }

    async fn run_attempt(weak: Weak<Self>, account: AccountNumber, generation: u64) {
        let request = {
            let Some(inner) = weak.upgrade() else { return };
            let attempt = match inner.state().current_mut(generation, Phase::Fetching) {
                Some(op) => op.attempt + 1,
                None => return,
            };
            debug!(account = %account, attempt, "Fetching account data");
            inner.fetcher.fetch_account(&account)
        };

        let result = request.await;

        let Some(inner) = weak.upgrade() else { return };
        match result {
            Ok(data) => inner.complete(account, generation, data),
            Err(error) => inner.fail(account, generation, error),
        }
    }

    fn complete(self: &Arc<Self>, account: AccountNumber, generation: u64, data: AccountData) {
        let watchers = {
            let mut state = self.state();
            if !state.is_current(generation, Phase::Fetching) {
                debug!(account = %account, "Discarding account data from superseded fetch");
                return;
            }
            let Some(op) = state.operation.take() else { return };

            if let Some(delay) = self.options.refresh_delay(&data, Utc::now()) {
                debug!(account = %account, delay_ms = delay.as_millis() as u64, "Scheduling account data refresh");
                let timer = tokio::spawn(Self::run_refresh(
                    Arc::downgrade(self),
                    account.clone(),
                    generation,
                    delay,
                ))
                .abort_handle();
                if let Some(previous) = state.refresh_timer.replace(timer) {
                    previous.abort();
                }
            }
            op.watchers
        };

        info!(account = %account, expiry = %data.expiry, "Account data updated");
        (self.on_update)(&data);
        for watcher in watchers {
            watcher.settle(None);
        }
    }

    fn fail(self: &Arc<Self>, account: AccountNumber, generation: u64, error: ApiError) {
        let (attempt, mut watchers) = {
            let mut state = self.state();
            let Some(op) = state.current_mut(generation, Phase::Fetching) else {
                debug!(account = %account, error = %error, "Ignoring failure of superseded fetch");
                return;
            };
            op.attempt += 1;
            let taken = (op.attempt, std::mem::take(&mut op.watchers));
            state.error_fanout = true;
            taken
        };

        warn!(account = %account, attempt, error = %error, "Account fetch failed");

        let decisions: Vec<RetryAction> = watchers.iter_mut().map(|w| w.error(&error)).collect();
        // Background refreshes have nobody to ask
        let retry = if decisions.is_empty() {
            RetryAction::for_error(&error) == RetryAction::Retry
        } else {
            decisions.contains(&RetryAction::Retry)
        };

        let mut state = self.state();
        state.error_fanout = false;
        let deferred = std::mem::take(&mut state.start_deferred);
        if !state.is_current(generation, Phase::Fetching) {
            let reason = if state.shut_down {
                SettleReason::ShutDown
            } else {
                SettleReason::Superseded
            };
            drop(state);
            for watcher in watchers {
                watcher.settle(Some(reason.clone()));
            }
            if deferred {
                self.start_deferred_attempt();
            }
            return;
        }
        let Some(op) = state.operation.as_mut() else { return };

        // Watchers that attached during the error callbacks go last
        watchers.append(&mut op.watchers);

        if retry {
            let delay = self.options.retry_delay(attempt);
            info!(
                account = %account,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling account fetch retry"
            );
            op.watchers = watchers;
            op.phase = Phase::RetryPending;
            op.task = Some(
                tokio::spawn(Self::run_retry(
                    Arc::downgrade(self),
                    account,
                    generation,
                    delay,
                ))
                .abort_handle(),
            );
            return;
        }

        state.operation = None;
        drop(state);

        info!(account = %account, attempt, "Giving up on account fetch");
        let error = Arc::new(error);
        for watcher in watchers {
            watcher.settle(Some(SettleReason::Failed(Arc::clone(&error))));
        }
    }

    async fn run_retry(weak: Weak<Self>, account: AccountNumber, generation: u64, delay: Duration) {
        tokio::time::sleep(delay).await;

        {
            let Some(inner) = weak.upgrade() else { return };
            let mut state = inner.state();
            let Some(op) = state.current_mut(generation, Phase::RetryPending) else {
                return;
            };
            op.phase = Phase::Fetching;
        }

        Self::run_attempt(weak, account, generation).await;
    }

    async fn run_refresh(weak: Weak<Self>, account: AccountNumber, generation: u64, delay: Duration) {
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else { return };
        let mut state = inner.state();
        if state.shut_down || state.generation != generation || state.operation.is_some() {
            return;
        }
        state.refresh_timer = None;

        info!(account = %account, "Refreshing stale account data");
        inner.start_operation(state, account, Vec::new());
    }

    fn shutdown(&self) {
        let previous = {
            let mut state = self.state();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.generation += 1;
            if let Some(timer) = state.refresh_timer.take() {
                timer.abort();
            }
            state.operation.take()
        };

        info!("Account data cache shut down");
        if let Some(op) = previous {
            if let Some(task) = op.task {
                task.abort();
            }
            for watcher in op.watchers {
                watcher.settle(Some(SettleReason::ShutDown));
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.refresh_timer.take() {
            timer.abort();
        }
        if let Some(op) = state.operation.take() {
            debug!(account = %op.account, "Dropping cache with a pending fetch");
            if let Some(task) = op.task {
                task.abort();
            }
            for watcher in op.watchers {
                watcher.settle(Some(SettleReason::ShutDown));
            }
        }
    }
}
