use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid account number: {0}")]
    InvalidAccount(String),

    #[error("Unauthorized - access token rejected")]
    Unauthorized,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 404 => ApiError::InvalidAccount(truncated),
            401 | 403 => ApiError::Unauthorized,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// A rejected account number will be rejected again, everything
    /// else may clear up on its own.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ApiError::InvalidAccount(_))
    }
}
