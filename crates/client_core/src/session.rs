//! Explicit admin session context shared by every synchronizer of one console.

use std::{fmt, sync::Arc};

use tokio::sync::RwLock;
use tracing::info;
use url::Url;
use zeroize::Zeroize;

use crate::error::SyncError;

/// Backend location and bearer credential for one signed-in admin.
#[derive(Clone)]
pub struct Session {
    base_url: Url,
    token: String,
}

impl Session {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, SyncError> {
        let parsed = Url::parse(base_url).map_err(|e| SyncError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SyncError::Unauthenticated);
        }
        Ok(Self {
            base_url: parsed,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Joins an endpoint path (always starting with `/`) onto the base url.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

/// Holder for the current session. Established on sign-in, cleared on sign-out;
/// every request reads it, so clearing it stops all further authenticated traffic.
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(session))),
        }
    }

    pub async fn establish(&self, session: Session) {
        info!(base_url = %session.base_url, "session: established");
        *self.inner.write().await = Some(session);
    }

    pub async fn clear(&self) {
        if self.inner.write().await.take().is_some() {
            info!("session: cleared");
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.is_some()
    }

    pub async fn current(&self) -> Result<Session, SyncError> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or(SyncError::Unauthenticated)
    }
}
