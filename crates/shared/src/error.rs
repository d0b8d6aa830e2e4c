use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_REASON_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::Validation,
            429 => Self::RateLimited,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

/// Error body some backend endpoints return. Neither field is guaranteed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Extracts a short failure reason from a raw response body, falling back to the
    /// (truncated) text when the body is not a JSON error object.
    pub fn reason_from_raw(raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let reason = match serde_json::from_str::<ErrorBody>(raw) {
            Ok(ErrorBody {
                message: Some(message),
                ..
            }) => message,
            Ok(ErrorBody {
                error: Some(error), ..
            }) => error,
            _ => raw.to_string(),
        };
        Some(truncate(&reason))
    }
}

fn truncate(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    let mut short: String = reason.chars().take(MAX_REASON_LEN).collect();
    short.push('…');
    short
}

#[derive(Debug, Clone, Error)]
#[error("{code:?} ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn from_response(status: u16, raw_body: &str) -> Self {
        let message = ErrorBody::reason_from_raw(raw_body)
            .unwrap_or_else(|| format!("request failed with status {status}"));
        Self {
            status,
            code: ErrorCode::from_status(status),
            message,
        }
    }
}
