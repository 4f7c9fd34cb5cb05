//! Data models for account status.
//!
//! - `AccountNumber`: validated subject identifier for fetches
//! - `AccountData`: the expiring account record returned by the API

pub mod account;

pub use account::{AccountData, AccountNumber, InvalidAccountNumber};
