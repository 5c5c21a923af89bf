//! HTTP client for the live log service.
//!
//! Build output is streamed to the service while a step runs and uploaded as
//! a blob once it finishes. Opening a stream and uploading a blob are retried
//! with exponential backoff on transport errors and 5xx responses; writing a
//! batch and closing a stream are single attempts.

mod error;

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backoff::ExponentialSettings;

pub use error::LogError;

/// Header carrying the account secret.
pub const AUTH_HEADER: &str = "X-Harness-Token";

/// Cap on the total time spent retrying `open` and `upload`.
pub const RETRY_BUDGET: Duration = Duration::from_secs(10);

const STREAM_ENDPOINT: &str = "/stream";
const BLOB_ENDPOINT: &str = "/blob";

/// A single line of build output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Line {
    /// Zero-based position in the stream.
    #[serde(rename = "pos")]
    pub number: i64,
    /// Line content.
    #[serde(rename = "out")]
    pub message: String,
    /// Milliseconds since the step started.
    #[serde(rename = "time")]
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
enum Payload {
    Empty,
    Json(Bytes),
    Raw(Bytes),
}

/// Client for one account on the live log service.
#[derive(Clone)]
pub struct LogClient {
    http: reqwest::Client,
    endpoint: String,
    account_id: String,
    token: String,
    backoff: ExponentialSettings,
}

impl std::fmt::Debug for LogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogClient")
            .field("endpoint", &self.endpoint)
            .field("account_id", &self.account_id)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl LogClient {
    /// Creates a client. Redirects are never followed; `skip_verify`
    /// disables TLS certificate checks for self-signed deployments.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Client`] when the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        account_id: impl Into<String>,
        secret: impl Into<String>,
        skip_verify: bool,
    ) -> Result<Self, LogError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(skip_verify)
            .build()
            .map_err(|err| LogError::Client(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            account_id: account_id.into(),
            token: secret.into(),
            backoff: ExponentialSettings::DEFAULT.with_max_elapsed(RETRY_BUDGET),
        })
    }

    /// Overrides the retry schedule for `open` and `upload`.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: ExponentialSettings) -> Self {
        self.backoff = backoff;
        self
    }

    /// Opens the stream identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] once retries are exhausted or on a 4xx answer.
    pub async fn open(&self, key: &str, cancel: &CancellationToken) -> Result<(), LogError> {
        self.send_with_retry(Method::POST, STREAM_ENDPOINT, key, &Payload::Empty, cancel)
            .await
    }

    /// Appends `lines` to the stream identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the request fails.
    pub async fn batch(
        &self,
        key: &str,
        lines: &[Line],
        cancel: &CancellationToken,
    ) -> Result<(), LogError> {
        let body = serde_json::to_vec(lines).map_err(|err| LogError::Encode(err.to_string()))?;
        self.send_cancellable(
            Method::PUT,
            STREAM_ENDPOINT,
            key,
            &Payload::Json(Bytes::from(body)),
            cancel,
        )
        .await
    }

    /// Uploads the complete log for `key` as a blob.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] once retries are exhausted or on a 4xx answer.
    pub async fn upload(
        &self,
        key: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), LogError> {
        self.send_with_retry(Method::POST, BLOB_ENDPOINT, key, &Payload::Raw(data), cancel)
            .await
    }

    /// Closes the stream identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the request fails.
    pub async fn close(&self, key: &str, cancel: &CancellationToken) -> Result<(), LogError> {
        self.send_cancellable(Method::DELETE, STREAM_ENDPOINT, key, &Payload::Empty, cancel)
            .await
    }

    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        key: &str,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), LogError> {
        let mut backoff = self.backoff.start();
        loop {
            let err = match self
                .send_cancellable(method.clone(), path, key, payload, cancel)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };
            let Some(delay) = backoff.next_backoff() else {
                tracing::warn!(path, key, error = %err, "giving up after retries");
                return Err(err);
            };
            tracing::debug!(
                path,
                key,
                error = %err,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "live log request failed, retrying"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(LogError::Cancelled),
                () = sleep(delay) => {}
            }
        }
    }

    async fn send_cancellable(
        &self,
        method: Method,
        path: &str,
        key: &str,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), LogError> {
        if cancel.is_cancelled() {
            return Err(LogError::Cancelled);
        }
        tokio::select! {
            () = cancel.cancelled() => Err(LogError::Cancelled),
            result = self.send_once(method, path, key, payload) => result,
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        key: &str,
        payload: &Payload,
    ) -> Result<(), LogError> {
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.endpoint))
            .query(&[("accountID", self.account_id.as_str()), ("key", key)])
            .header(AUTH_HEADER, &self.token);
        request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone()),
            Payload::Raw(body) => request.body(body.clone()),
        };

        let response = request
            .send()
            .await
            .map_err(|err| LogError::Transport(err.to_string()))?;
        let status = response.status();
        // Drain the body so the connection can be reused.
        let body = response
            .bytes()
            .await
            .map_err(|err| LogError::Transport(err.to_string()))?;
        if status.as_u16() < 300 {
            return Ok(());
        }
        Err(LogError::Server {
            status: status.as_u16(),
            message: server_message(status, &body),
        })
    }
}

fn server_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body)
        && !parsed.message.is_empty()
    {
        return parsed.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_owned();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_owned()
    } else {
        text
    }
}

#[cfg(test)]
mod tests;
