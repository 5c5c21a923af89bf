//! OAuth access tokens for Compute Engine calls.
//!
//! Credentials resolve in order: a static token, a service-account key file,
//! then the metadata server of the VM the process runs on. Tokens are cached
//! until shortly before they expire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::api::ApiError;
use super::error::GoogleDriverError;
use super::http::HTTP_CLIENT;
use crate::config::GoogleConfig;
use crate::util::{expand_tilde, read_to_string_ambient};

/// Scope requested for the driver's own API calls.
pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Fields of a service-account JSON key used to mint tokens.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct ServiceAccountKey {
    /// Account email, used as the JWT issuer.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Token exchange endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

/// Where access tokens come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credentials {
    /// A pre-minted token used as-is.
    Static(String),
    /// A service-account key exchanged for tokens.
    ServiceAccount(ServiceAccountKey),
    /// The metadata server of the host VM.
    MetadataServer,
}

impl Credentials {
    /// Resolves credentials from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GoogleDriverError::Auth`] when the key file cannot be read
    /// or parsed.
    pub fn from_config(config: &GoogleConfig) -> Result<Self, GoogleDriverError> {
        if let Some(token) = config.access_token.as_deref()
            && !token.trim().is_empty()
        {
            return Ok(Self::Static(token.trim().to_owned()));
        }
        let Some(path) = config.json_path.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(Self::MetadataServer);
        };
        let expanded = expand_tilde(path);
        let raw = read_to_string_ambient(Utf8Path::new(&expanded)).map_err(|message| {
            GoogleDriverError::Auth(format!("failed to read key file `{expanded}`: {message}"))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|err| {
            GoogleDriverError::Auth(format!("invalid key file `{expanded}`: {err}"))
        })?;
        Ok(Self::ServiceAccount(key))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Caching source of bearer tokens.
pub struct TokenSource {
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    /// Creates a token source; no request is made until the first call.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, refreshing it when needed.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when signing or the token exchange fails.
    pub async fn token(&self) -> Result<String, ApiError> {
        if let Credentials::Static(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref()
            && Instant::now() < current.refresh_at
        {
            return Ok(current.value.clone());
        }

        let response = match &self.credentials {
            Credentials::ServiceAccount(key) => exchange_assertion(key).await?,
            Credentials::MetadataServer => fetch_from_metadata().await?,
            Credentials::Static(token) => return Ok(token.clone()),
        };
        tracing::debug!(expires_in = response.expires_in, "refreshed access token");

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(REFRESH_MARGIN);
        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: u64) -> Result<String, ApiError> {
    let claims = Claims {
        iss: &key.client_email,
        scope: COMPUTE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME.as_secs(),
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| ApiError::transport(format!("invalid service account key: {err}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|err| ApiError::transport(format!("failed to sign token request: {err}")))
}

async fn exchange_assertion(key: &ServiceAccountKey) -> Result<TokenResponse, ApiError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    let assertion = sign_assertion(key, now)?;
    let request = HTTP_CLIENT
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())]);
    read_token(request).await
}

async fn fetch_from_metadata() -> Result<TokenResponse, ApiError> {
    let request = HTTP_CLIENT
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google");
    read_token(request).await
}

async fn read_token(request: reqwest::RequestBuilder) -> Result<TokenResponse, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|err| ApiError::transport(format!("token request failed: {err}")))?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| ApiError::transport(format!("failed to read token response: {err}")))?;
    if !status.is_success() {
        return Err(ApiError::http(
            status.as_u16(),
            format!("token request rejected: {}", String::from_utf8_lossy(&body).trim()),
        ));
    }
    serde_json::from_slice(&body)
        .map_err(|err| ApiError::transport(format!("invalid token response: {err}")))
}
