//! Authentication module for the accounts API.
//!
//! `Session` holds the short-lived access token obtained by exchanging an
//! account number. Tokens live in memory only and are replaced shortly
//! before they expire.

pub mod session;

pub use session::{Session, SessionData};
