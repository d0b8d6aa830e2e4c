use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use shared::error::ApiError;
use tracing::warn;

use crate::{error::SyncError, session::SessionContext};

/// Request/response seam to the admin REST backend. Paths are relative to the
/// session's base url and always start with `/`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SyncError>;
    async fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError>;
    async fn put(&self, path: &str, body: &Value) -> Result<Value, SyncError>;
    async fn delete(&self, path: &str) -> Result<(), SyncError>;
}

pub struct HttpTransport {
    http: Client,
    session: SessionContext,
}

impl HttpTransport {
    pub fn new(session: SessionContext) -> Self {
        Self {
            http: Client::new(),
            session,
        }
    }

    pub fn with_timeout(session: SessionContext, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport {
                path: String::new(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { http, session })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    async fn authorized(
        &self,
        path: &str,
        build: impl FnOnce(&Client, String) -> RequestBuilder,
    ) -> Result<RequestBuilder, SyncError> {
        let session = self.session.current().await?;
        Ok(build(&self.http, session.url_for(path)).bearer_auth(session.token()))
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, SyncError> {
        let response = request.send().await.map_err(|e| {
            warn!(path, error = %e, "transport: request failed");
            SyncError::Transport {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        let source = ApiError::from_response(status.as_u16(), &raw);
        warn!(path, status = status.as_u16(), reason = %source.message, "transport: non-success status");
        Err(SyncError::Status {
            path: path.to_string(),
            source,
        })
    }

    async fn read_text(path: &str, response: Response) -> Result<String, SyncError> {
        response.text().await.map_err(|e| SyncError::Transport {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Write responses are not consumed by the synchronizer, so an empty or non-JSON
    /// body is kept as-is instead of failing an otherwise successful write.
    async fn write_body(path: &str, response: Response) -> Result<Value, SyncError> {
        let raw = Self::read_text(path, response).await?;
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SyncError> {
        let request = self
            .authorized(path, |http, url| http.get(url).query(query))
            .await?;
        let response = self.send(path, request).await?;
        let raw = Self::read_text(path, response).await?;
        serde_json::from_str(&raw).map_err(|e| SyncError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        let request = self
            .authorized(path, |http, url| http.post(url).json(body))
            .await?;
        let response = self.send(path, request).await?;
        Self::write_body(path, response).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        let request = self
            .authorized(path, |http, url| http.put(url).json(body))
            .await?;
        let response = self.send(path, request).await?;
        Self::write_body(path, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        let request = self
            .authorized(path, |http, url| http.delete(url))
            .await?;
        self.send(path, request).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
