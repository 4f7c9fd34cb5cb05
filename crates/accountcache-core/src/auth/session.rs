use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AccountNumber;

/// Buffer time before expiry at which a token is no longer handed out.
/// Keeps a request from racing the token's expiry on the server.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// An access token issued for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub account: AccountNumber,
    pub expiry: DateTime<Utc>,
}

impl SessionData {
    /// Check if the token will expire soon and should be replaced
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry - Duration::seconds(TOKEN_REFRESH_BUFFER_SECS)
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expiry - now
    }
}

/// In-memory access token holder.
///
/// Tokens are never written to disk; a restart exchanges the account
/// number again.
#[derive(Debug, Default)]
pub struct Session {
    data: Option<SessionData>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update session with a freshly issued token
    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    /// Clear session data
    pub fn clear(&mut self) {
        self.data = None;
    }

    /// Get the bearer token if it belongs to `account` and is not about to expire
    pub fn token_for(&self, account: &AccountNumber, now: DateTime<Utc>) -> Option<&str> {
        self.data
            .as_ref()
            .filter(|d| &d.account == account && !d.needs_refresh_at(now))
            .map(|d| d.access_token.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_for(account: &AccountNumber, expiry: DateTime<Utc>) -> Session {
        let mut session = Session::new();
        session.update(SessionData {
            access_token: "token".to_string(),
            account: account.clone(),
            expiry,
        });
        session
    }

    #[test]
    fn test_token_for_matching_account() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let account = AccountNumber::new("1234567890").unwrap();
        let other = AccountNumber::new("0987654321").unwrap();
        let session = session_for(&account, now + Duration::hours(1));

        assert_eq!(session.token_for(&account, now), Some("token"));
        assert_eq!(session.token_for(&other, now), None);
    }

    #[test]
    fn test_token_withheld_near_expiry() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let account = AccountNumber::new("1234567890").unwrap();
        let session = session_for(&account, now + Duration::seconds(30));

        assert_eq!(session.token_for(&account, now), None);
    }

    #[test]
    fn test_clear() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let account = AccountNumber::new("1234567890").unwrap();
        let mut session = session_for(&account, now + Duration::hours(1));
        session.clear();
        assert_eq!(session.token_for(&account, now), None);
    }
}
