//! Core library for accountcache.
//!
//! Provides the account data cache together with the pieces a frontend needs
//! around it: the accounts API client, data models, and configuration.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use cache::{AccountDataCache, CacheOptions, FetchWatcher, RetryAction, SettleReason};
pub use config::Config;
pub use models::{AccountData, AccountNumber};
