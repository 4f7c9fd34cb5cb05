//! REST API client module for the accounts service.
//!
//! This module provides the `ApiClient`, the HTTP implementation of the
//! fetcher used by the account data cache, and `ApiError`, the error
//! taxonomy every fetch attempt reports.
//!
//! The API uses bearer access tokens obtained by exchanging the account
//! number at the token endpoint.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
