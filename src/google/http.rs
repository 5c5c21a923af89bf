//! [`ComputeApi`] implementation over the Compute Engine REST API.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::api::{ApiError, ApiFuture, ComputeApi};
use super::auth::TokenSource;
use super::types::{ComputeInstance, Firewall, Metadata, Operation};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default Compute Engine v1 endpoint.
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

pub(super) static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// REST client authorised by a [`TokenSource`].
#[derive(Debug)]
pub struct HttpComputeApi {
    base_url: String,
    tokens: TokenSource,
}

impl HttpComputeApi {
    /// Creates a client for the public Compute Engine endpoint.
    #[must_use]
    pub fn new(tokens: TokenSource) -> Self {
        Self {
            base_url: COMPUTE_API_BASE.to_owned(),
            tokens,
        }
    }

    /// Points the client at another endpoint, such as a local emulator.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{path}", self.base_url)
    }

    async fn authorised(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.token().await?;
        Ok(HTTP_CLIENT.request(method, self.url(path)).bearer_auth(token))
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|err| ApiError::transport(format!("request failed: {err}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::transport(format!("failed to read response: {err}")))?;
        if !status.is_success() {
            return Err(ApiError::http(status.as_u16(), error_message(status, &body)));
        }
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::transport(format!("invalid response body: {err}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: String) -> Result<T, ApiError> {
        Self::execute(self.authorised(Method::GET, &path).await?).await
    }

    async fn post<T: DeserializeOwned, B: serde::Serialize + Sync>(
        &self,
        path: String,
        body: &B,
    ) -> Result<T, ApiError> {
        Self::execute(self.authorised(Method::POST, &path).await?.json(body)).await
    }
}

fn error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body)
        && !envelope.error.message.is_empty()
    {
        return envelope.error.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_owned();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_owned()
    } else {
        text
    }
}

impl ComputeApi for HttpComputeApi {
    fn insert_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a ComputeInstance,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(self.post(format!("{project}/zones/{zone}/instances"), instance))
    }

    fn get_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, ComputeInstance> {
        Box::pin(self.get(format!("{project}/zones/{zone}/instances/{instance}")))
    }

    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let path = format!("{project}/zones/{zone}/instances/{instance}");
            Self::execute(self.authorised(Method::DELETE, &path).await?).await
        })
    }

    fn set_metadata<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
        metadata: &'a Metadata,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(self.post(
            format!("{project}/zones/{zone}/instances/{instance}/setMetadata"),
            metadata,
        ))
    }

    fn get_zone_operation<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(self.get(format!("{project}/zones/{zone}/operations/{operation}")))
    }

    fn get_global_operation<'a>(
        &'a self,
        project: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(self.get(format!("{project}/global/operations/{operation}")))
    }

    fn get_firewall<'a>(&'a self, project: &'a str, name: &'a str) -> ApiFuture<'a, Firewall> {
        Box::pin(self.get(format!("{project}/global/firewalls/{name}")))
    }

    fn insert_firewall<'a>(
        &'a self,
        project: &'a str,
        firewall: &'a Firewall,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(self.post(format!("{project}/global/firewalls"), firewall))
    }

    fn list_regions<'a>(&'a self, project: &'a str) -> ApiFuture<'a, u16> {
        Box::pin(async move {
            let request = self
                .authorised(Method::GET, &format!("{project}/regions"))
                .await?
                .query(&[("maxResults", "1")]);
            let response = request
                .send()
                .await
                .map_err(|err| ApiError::transport(format!("request failed: {err}")))?;
            let status = response.status().as_u16();
            response
                .bytes()
                .await
                .map_err(|err| ApiError::transport(format!("failed to read response: {err}")))?;
            Ok(status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::auth::Credentials;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpComputeApi {
        HttpComputeApi::new(TokenSource::new(Credentials::Static(String::from("tok"))))
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn get_instance_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/zones/us-central1-a/instances/vm-1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "42",
                "name": "vm-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vm = api_for(&server)
            .get_instance("proj", "us-central1-a", "vm-1")
            .await
            .expect("instance");
        assert_eq!(vm.id, "42");
    }

    #[tokio::test]
    async fn not_found_carries_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/global/firewalls/default-allow-docker"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": 404, "message": "The resource was not found"}
            })))
            .mount(&server)
            .await;

        let err = api_for(&server)
            .get_firewall("proj", "default-allow-docker")
            .await
            .expect_err("missing firewall");
        assert!(err.is_not_found());
        assert_eq!(err.message, "The resource was not found");
    }

    #[tokio::test]
    async fn set_metadata_posts_fingerprint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/proj/zones/z/instances/7/setMetadata"))
            .and(body_partial_json(serde_json::json!({"fingerprint": "fp1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "op-7",
                "status": "RUNNING"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = Metadata {
            fingerprint: String::from("fp1"),
            items: Vec::new(),
        };
        let op = api_for(&server)
            .set_metadata("proj", "z", "7", &metadata)
            .await
            .expect("operation");
        assert_eq!(op.name, "op-7");
    }

    #[tokio::test]
    async fn list_regions_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/regions"))
            .and(query_param("maxResults", "1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let status = api_for(&server).list_regions("proj").await.expect("status");
        assert_eq!(status, 403);
    }
}
