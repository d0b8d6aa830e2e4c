use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("no active session; sign in first")]
    Unauthenticated,
    #[error("invalid backend url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("request to {path} failed: {reason}")]
    Transport { path: String, reason: String },
    #[error("request to {path} was rejected: {source}")]
    Status { path: String, source: ApiError },
    #[error("malformed response from {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("failed to encode request payload: {0}")]
    Encode(String),
    #[error("another change to {resource} is still in progress")]
    Busy { resource: &'static str },
    #[error("{resource} view has been torn down")]
    Detached { resource: &'static str },
    #[error("{resource} does not support {operation}")]
    Unsupported {
        resource: &'static str,
        operation: &'static str,
    },
    #[error("{resource} has no record with key {key}")]
    UnknownKey { resource: &'static str, key: String },
    #[error("{resource} has no filter named '{name}'")]
    UnknownFilter { resource: &'static str, name: String },
}

impl SyncError {
    /// Short message for the operator. Remote failures of every kind collapse into one
    /// "operation failed" signal; the variant itself is kept for logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { .. } | Self::Decode { .. } => "Operation failed.".to_string(),
            Self::Status { source, .. } => format!("Operation failed: {}", source.message),
            Self::Unauthenticated => "Not signed in.".to_string(),
            Self::Busy { .. } => "A change is already in progress; please wait.".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the failure came from talking to the backend rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Status { .. } | Self::Decode { .. }
        )
    }

    /// Whether the backend rejected the session credential.
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Unauthenticated => true,
            Self::Status { source, .. } => {
                matches!(source.code, ErrorCode::Unauthorized | ErrorCode::Forbidden)
            }
            _ => false,
        }
    }
}
