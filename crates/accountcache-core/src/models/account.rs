use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of digits in an account number.
/// Older accounts use 10 digits, current ones 16.
const MIN_ACCOUNT_DIGITS: usize = 10;

/// Maximum number of digits in an account number.
const MAX_ACCOUNT_DIGITS: usize = 16;

/// Number of trailing digits left visible when logging an account number.
const VISIBLE_DIGITS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAccountNumber {
    #[error("Account number is empty")]
    Empty,

    #[error("Account number contains a non-digit character: {0:?}")]
    NonDigit(char),

    #[error("Account number must be 10-16 digits, got {0}")]
    Length(usize),
}

/// An account number identifying whose account data is fetched.
///
/// Only constructible through validation, so an empty or malformed
/// number never reaches the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    /// Parse an account number, ignoring whitespace used for grouping.
    pub fn new(input: &str) -> Result<Self, InvalidAccountNumber> {
        let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.is_empty() {
            return Err(InvalidAccountNumber::Empty);
        }
        if let Some(c) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(InvalidAccountNumber::NonDigit(c));
        }
        if !(MIN_ACCOUNT_DIGITS..=MAX_ACCOUNT_DIGITS).contains(&digits.len()) {
            return Err(InvalidAccountNumber::Length(digits.len()));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Account number with all but the last few digits hidden, for logs
    pub fn masked(&self) -> String {
        let hidden = self.0.len().saturating_sub(VISIBLE_DIGITS);
        format!("{}{}", "*".repeat(hidden), &self.0[hidden..])
    }

    /// Account number split into groups of four digits for display
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl FromStr for AccountNumber {
    type Err = InvalidAccountNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = InvalidAccountNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

/// Account record returned by the accounts endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct AccountData {
    /// Account identifier assigned by the server (not the account number)
    #[serde(default)]
    pub id: Option<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub max_devices: Option<u32>,
    #[serde(default)]
    pub can_add_devices: Option<bool>,
}

impl AccountData {
    pub fn new(expiry: DateTime<Utc>) -> Self {
        Self {
            id: None,
            expiry,
            max_devices: None,
            can_add_devices: None,
        }
    }

    /// An account is expired once its expiry is not in the future.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Time left before expiry, negative once expired
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expiry - now
    }

    /// Whether the account is expired or will expire within `horizon`
    pub fn expires_within(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        self.time_until_expiry(now) <= horizon
    }

    pub fn remaining_display(&self, now: DateTime<Utc>) -> String {
        let remaining = self.time_until_expiry(now);
        if remaining <= Duration::zero() {
            "expired".to_string()
        } else if remaining < Duration::days(1) {
            "less than a day".to_string()
        } else if remaining < Duration::days(90) {
            let days = remaining.num_days();
            if days == 1 {
                "1 day".to_string()
            } else {
                format!("{} days", days)
            }
        } else {
            format!("{} months", remaining.num_days() / 30)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_account_number_parsing() {
        let account = AccountNumber::new("1234 5678 9012 3456").unwrap();
        assert_eq!(account.as_str(), "1234567890123456");
        assert_eq!(account.grouped(), "1234 5678 9012 3456");

        assert_eq!(AccountNumber::new(""), Err(InvalidAccountNumber::Empty));
        assert_eq!(AccountNumber::new("   "), Err(InvalidAccountNumber::Empty));
        assert_eq!(
            AccountNumber::new("12345678x0"),
            Err(InvalidAccountNumber::NonDigit('x'))
        );
        assert_eq!(AccountNumber::new("123"), Err(InvalidAccountNumber::Length(3)));
        assert!("9876543210".parse::<AccountNumber>().is_ok());
    }

    #[test]
    fn test_account_number_masked_in_display() {
        let account = AccountNumber::new("1234567890123456").unwrap();
        assert_eq!(account.masked(), "************3456");
        assert_eq!(account.to_string(), "************3456");
    }

    #[test]
    fn test_account_number_serde() {
        let account: AccountNumber = serde_json::from_str("\"9876543210\"").unwrap();
        assert_eq!(account.as_str(), "9876543210");
        assert!(serde_json::from_str::<AccountNumber>("\"\"").is_err());
    }

    #[test]
    fn test_account_data_expiry() {
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let data = AccountData::new(now + Duration::days(2));

        assert!(!data.is_expired_at(now));
        assert!(data.is_expired_at(now + Duration::days(2)));
        assert!(data.expires_within(Duration::days(3), now));
        assert!(!data.expires_within(Duration::days(1), now));
    }

    #[test]
    fn test_remaining_display() {
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(AccountData::new(now - Duration::hours(1)).remaining_display(now), "expired");
        assert_eq!(
            AccountData::new(now + Duration::hours(5)).remaining_display(now),
            "less than a day"
        );
        assert_eq!(AccountData::new(now + Duration::hours(30)).remaining_display(now), "1 day");
        assert_eq!(AccountData::new(now + Duration::days(12)).remaining_display(now), "12 days");
        assert_eq!(
            AccountData::new(now + Duration::days(365)).remaining_display(now),
            "12 months"
        );
    }

    #[test]
    fn test_account_data_deserializes_api_payload() {
        let json = r#"{
            "id": "abc-123",
            "expiry": "2038-01-01T00:00:00+00:00",
            "max_devices": 5,
            "can_add_devices": true
        }"#;
        let data: AccountData = serde_json::from_str(json).unwrap();
        assert_eq!(data.id.as_deref(), Some("abc-123"));
        assert_eq!(data.expiry, Utc.with_ymd_and_hms(2038, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(data.max_devices, Some(5));

        let minimal: AccountData = serde_json::from_str(r#"{"expiry":"2038-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(minimal.id, None);
    }
}
