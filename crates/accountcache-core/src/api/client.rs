//! HTTP client for the accounts API.
//!
//! `ApiClient` exchanges an account number for a short-lived access token and
//! uses it to read the account record. It implements `AccountFetcher`, so it
//! can be handed straight to the account data cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::{Session, SessionData};
use crate::cache::AccountFetcher;
use crate::config::Config;
use crate::models::{AccountData, AccountNumber};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Endpoint exchanging an account number for an access token
const TOKEN_PATH: &str = "/auth/v1/token";

/// Endpoint returning the account record of the token's owner
const ACCOUNT_PATH: &str = "/accounts/v1/accounts/me";

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    account_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expiry: DateTime<Utc>,
}

/// API client for the accounts service.
/// Clone is cheap - the connection pool and session are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    session: Arc<Mutex<Session>>,
}

impl ApiClient {
    /// Create a new API client against `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session: Arc::new(Mutex::new(Session::new())),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Exchange an account number for an access token
    pub async fn authenticate(&self, account: &AccountNumber) -> Result<SessionData, ApiError> {
        let url = self.url(TOKEN_PATH);
        debug!(account = %account, "Requesting access token");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&TokenRequest {
                account_number: account.as_str(),
            })
            .send()
            .await?;

        let token: TokenResponse = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed token response: {}", e)))?;

        Ok(SessionData {
            access_token: token.access_token,
            account: account.clone(),
            expiry: token.expiry,
        })
    }

    /// Get a usable access token, authenticating when the session has none
    async fn access_token(&self, account: &AccountNumber) -> Result<String, ApiError> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.token_for(account, Utc::now()) {
            return Ok(token.to_string());
        }

        let data = self.authenticate(account).await?;
        debug!(
            account = %account,
            valid_for_secs = data.time_until_expiry(Utc::now()).num_seconds(),
            "Access token issued"
        );
        let token = data.access_token.clone();
        session.update(data);
        Ok(token)
    }

    /// Fetch the account record for `account`
    pub async fn fetch_account_data(&self, account: &AccountNumber) -> Result<AccountData, ApiError> {
        let token = self.access_token(account).await?;
        let url = self.url(ACCOUNT_PATH);

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; the next attempt authenticates again
            warn!(account = %account, "Access token rejected, clearing session");
            self.session.lock().await.clear();
        }

        Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed account response: {}", e)))
    }
}

impl AccountFetcher for ApiClient {
    fn fetch_account(
        &self,
        account: &AccountNumber,
    ) -> BoxFuture<'static, Result<AccountData, ApiError>> {
        let client = self.clone();
        let account = account.clone();
        async move { client.fetch_account_data(&account).await }.boxed()
    }
}
