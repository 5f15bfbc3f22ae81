//! Transport layer: the protocol's view of the wire.
//!
//! [`Transport`] is the seam between the versioned-secret protocol logic in
//! [`crate::kv`] and the network. The facade composes paths and bodies; an
//! implementation owns authentication, the response envelope, and
//! cancellation. [`HttpTransport`] is the production implementation,
//! speaking the Strata HTTP API over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// An authenticated channel to a Strata server.
///
/// Implementations must be safe to share across async tasks
/// (`Send + Sync`). `Ok(None)` from [`read`](Transport::read) means the
/// path does not resolve — callers decide whether that is an error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Read the logical data at `path`. Query parameters select versions.
    ///
    /// Returns `Ok(None)` when nothing exists at the path.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network, auth, or server failures.
    async fn read(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Option<Value>, TransportError>;

    /// Write `body` to `path`, returning the server's logical response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Conflict`] when a check-and-set
    /// precondition rejects the write.
    async fn write(&self, path: &str, body: &Value) -> Result<Option<Value>, TransportError>;

    /// Apply a server-side merge-patch to `path`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::MethodNotAllowed`] when the server predates
    ///   merge-patch support.
    /// - [`TransportError::PermissionDenied`] when the token's policy lacks
    ///   the patch capability.
    async fn patch(&self, path: &str, body: &Value) -> Result<Option<Value>, TransportError>;

    /// Delete the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network, auth, or server failures.
    async fn delete(&self, path: &str) -> Result<(), TransportError>;
}

/// Success envelope: the logical payload nests under `data`.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// reqwest-backed [`Transport`] speaking the Strata HTTP API.
///
/// Requests carry a bearer token and observe both the configured timeout
/// and the caller's cancellation token. Cancellation is checked before each
/// round trip and raced against in-flight requests, so a multi-step
/// operation never issues another request after its token fires.
pub struct HttpTransport {
    base_url: String,
    token: String,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport against `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strata-sdk-rust/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
            cancel,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    /// Send one request through the cancellation guard and map the response.
    ///
    /// `missing_ok` turns a 404 into `Ok(None)`; reads pass it, writes and
    /// deletes treat 404 as a server error.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        missing_ok: bool,
    ) -> Result<Option<Value>, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let request = request.header("Authorization", format!("Bearer {}", self.token));

        let response = tokio::select! {
            () = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e)
                }
            })?,
        };

        let status = response.status();

        if status == StatusCode::NOT_FOUND && missing_ok {
            return Ok(None);
        }

        if status.is_success() {
            let text = response.text().await.map_err(TransportError::Network)?;
            if text.is_empty() {
                return Ok(None);
            }
            let envelope: Envelope = serde_json::from_str(&text)?;
            return Ok(envelope.data);
        }

        let message = error_message(response).await;
        Err(match status {
            StatusCode::METHOD_NOT_ALLOWED => TransportError::MethodNotAllowed { message },
            StatusCode::FORBIDDEN => TransportError::PermissionDenied { message },
            StatusCode::CONFLICT => TransportError::Conflict { message },
            _ => TransportError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

/// Best-effort extraction of the server's error message; falls back to the
/// bare status code when the body is absent or unparseable.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ApiErrorBody>(&text)
        .ok()
        .and_then(|body| body.error)
        .and_then(|detail| detail.message)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn read(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Option<Value>, TransportError> {
        let mut request = self.client.get(self.url(path));
        if !query.is_empty() {
            request = request.query(query);
        }
        self.execute(request, true).await
    }

    async fn write(&self, path: &str, body: &Value) -> Result<Option<Value>, TransportError> {
        self.execute(self.client.put(self.url(path)).json(body), false)
            .await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Option<Value>, TransportError> {
        let bytes = serde_json::to_vec(body)?;
        let request = self
            .client
            .patch(self.url(path))
            .header(CONTENT_TYPE, "application/merge-patch+json")
            .body(bytes);
        self.execute(request, false).await
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        self.execute(self.client.delete(self.url(path)), false)
            .await
            .map(|_| ())
    }
}
