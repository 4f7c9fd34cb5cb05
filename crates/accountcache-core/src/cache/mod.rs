//! In-memory account data cache.
//!
//! This module provides the `AccountDataCache`, which fetches account data
//! on behalf of many callers. Duplicate requests for the same account share
//! a single fetch, a request for another account supersedes the one in
//! flight, failed attempts are retried with exponential backoff, and expired
//! or soon-to-expire records are re-fetched in the background.
//!
//! Nothing is persisted; a restart starts from an empty cache.

pub mod account_data;
pub mod backoff;
pub mod watcher;

pub use account_data::{AccountDataCache, AccountFetcher, CacheOptions};
pub use backoff::Backoff;
pub use watcher::{FetchWatcher, RetryAction, SettleReason};
