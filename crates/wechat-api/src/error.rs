//! WeChat API error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ApiError>;

/// WeChat error codes meaning the access token was rejected.
const INVALID_TOKEN_CODES: [i64; 3] = [40001, 40014, 42001];

/// Errors returned by the WeChat HTTP calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure (DNS, connect, timeout, TLS).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status with the raw body.
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON.
    #[error("Failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The API answered with a non-zero `errcode`.
    #[error("WeChat API error: code={code}, msg={message}")]
    Api { code: i64, message: String },

    /// The token exchange succeeded but carried no token.
    #[error("Empty access token received")]
    EmptyToken,
}

impl ApiError {
    /// Create an API error from an `errcode`/`errmsg` pair.
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Check if WeChat rejected the access token itself (expired or revoked).
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::Api { code, .. } if INVALID_TOKEN_CODES.contains(code))
    }
}

/// Failure to obtain an access token.
///
/// Every exchange failure collapses into this single kind so the same value can
/// be handed to every caller waiting on one refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Access token unavailable: {0}")]
    Unavailable(String),
}

impl CredentialError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable(detail.into())
    }
}

impl From<ApiError> for CredentialError {
    fn from(err: ApiError) -> Self {
        Self::Unavailable(err.to_string())
    }
}
