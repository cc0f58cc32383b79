use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

/// Type alias for Result with OutlookError
pub type Result<T> = std::result::Result<T, OutlookError>;

/// Error types for the Outlook client and the purge workflow
#[derive(Error, Debug)]
pub enum OutlookError {
    /// Graph API returned an error
    #[error("Graph API error: {0}")]
    ApiError(String),

    /// Authentication failed or the access token was rejected
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl OutlookError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OutlookError::RateLimitExceeded { .. }
                | OutlookError::ServerError { .. }
                | OutlookError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors after which no further mailbox call can succeed in this run
    pub fn is_fatal(&self) -> bool {
        matches!(self, OutlookError::AuthError(_))
    }

    /// Map a non-success Graph response to an error
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let status_code = status.as_u16();
        let detail = graph_error_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string()
        });
        let message = format!("HTTP {}: {}", status_code, detail);

        match status_code {
            429 => OutlookError::RateLimitExceeded {
                retry_after: parse_retry_after_header(headers),
            },
            401 => OutlookError::AuthError(message),
            404 => OutlookError::MessageNotFound(detail),
            400 => OutlookError::BadRequest(message),
            403 => OutlookError::Forbidden(message),
            500..=599 => OutlookError::ServerError {
                status: status_code,
                message,
            },
            _ => OutlookError::ApiError(message),
        }
    }
}

impl From<reqwest::Error> for OutlookError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            OutlookError::InvalidResponse(error.to_string())
        } else if error.is_timeout() {
            OutlookError::NetworkError(format!("Request timed out: {}", error))
        } else if let Some(status) = error.status() {
            OutlookError::from_status(status, &HeaderMap::new(), "")
        } else {
            OutlookError::NetworkError(format!("Connection error: {}", error))
        }
    }
}

/// Pull `error.code: error.message` out of a Graph OData error body
fn graph_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("Unknown");
    let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("");
    Some(format!("{} - {}", code, message))
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header(headers: &HeaderMap) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = headers.get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}
