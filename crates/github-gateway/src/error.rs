//! Error types for github-gateway

use serde_json::Value;
use thiserror::Error;

/// Substrings GitHub uses when `createCommitOnBranch` loses an
/// expected-head race.
const HEAD_MISMATCH_MARKERS: &[&str] = &["expected head oid did not match", "but it did not"];

/// Errors that can occur while talking to the GitHub API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-success HTTP status that was not accepted by the caller
    #[error("HTTP error {status}: {message}. Response: {body}")]
    Status {
        status: u16,
        message: String,
        body: String,
        /// Whether the status belonged to the request's retry set
        retryable: bool,
    },

    /// GraphQL response carried an `errors` array
    #[error("GraphQL request returned errors: {}", summarize(.0))]
    GraphQl(Vec<Value>),

    /// Secret does not look like a personal or installation token
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Response lacked a field the caller depends on
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),

    /// Connection-level failure (DNS, TLS, timeout, broken pipe)
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// JSON encoding/decoding error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when a GraphQL error reports that the branch head moved.
    pub fn is_head_mismatch(&self) -> bool {
        let ApiError::GraphQl(errors) = self else {
            return false;
        };
        errors.iter().any(|err| {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            HEAD_MISMATCH_MARKERS.iter().any(|m| message.contains(m))
        })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

fn summarize(errors: &[Value]) -> String {
    errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for github-gateway operations.
pub type Result<T> = std::result::Result<T, ApiError>;
