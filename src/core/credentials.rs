//! Credential providers for the Live connection.
//!
//! The connection manager only calls [`CredentialProvider::get_credentials`]
//! before every handshake and [`CredentialProvider::invalidate`] after the
//! provider rejects a key. Caching policy belongs to the implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::core::realtime::{SessionError, SessionResult};

/// Short-lived key and the model it is scoped to.
#[derive(Clone)]
pub struct Credentials {
    /// API key passed as the `key` query parameter
    pub api_key: Zeroizing<String>,
    /// Model pinned by the credential source, if any
    pub model: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            api_key: Zeroizing::new(api_key.into()),
            model,
        }
    }

    /// Model to request, falling back to `default_model` when none is pinned.
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        match self.model.as_deref() {
            Some(model) if !model.trim().is_empty() => model,
            _ => default_model,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Source of credentials for the Live API.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return usable credentials, fetching them if nothing valid is cached.
    async fn get_credentials(&self) -> SessionResult<Credentials>;

    /// Drop any cached credentials after an authentication failure.
    fn invalidate(&self);
}

// =============================================================================
// Static provider
// =============================================================================

/// Provider wrapping a configured key. `invalidate` is a no-op.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            credentials: Credentials::new(api_key, model),
        }
    }

    pub fn shared(api_key: impl Into<String>, model: Option<String>) -> Arc<dyn CredentialProvider> {
        Arc::new(Self::new(api_key, model))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self) -> SessionResult<Credentials> {
        if self.credentials.api_key.trim().is_empty() {
            return Err(SessionError::Credentials("API key is empty".to_string()));
        }
        Ok(self.credentials.clone())
    }

    fn invalidate(&self) {
        debug!("Static credentials cannot be refreshed; ignoring invalidate");
    }
}

// =============================================================================
// HTTP provider
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "api_key", rename = "apiKey")]
    api_key: String,
    #[serde(default)]
    model: Option<String>,
}

struct CachedCredentials {
    credentials: Credentials,
    fetched_at: Instant,
}

/// Provider that fetches `{apiKey, model}` from an HTTP token endpoint and
/// caches the result for `ttl`.
pub struct HttpCredentialProvider {
    url: String,
    bearer_token: Option<Zeroizing<String>>,
    ttl: Duration,
    timeout: Duration,
    client: reqwest::Client,
    cache: Mutex<Option<CachedCredentials>>,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            ttl: Duration::from_secs(300),
            timeout: Duration::from_secs(10),
            client: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(Zeroizing::new(token.into()));
        self
    }

    /// How long fetched credentials are reused.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn cached(&self) -> Option<Credentials> {
        let cache = self.cache.lock();
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.credentials.clone())
    }

    async fn fetch(&self) -> SessionResult<Credentials> {
        debug!(url = %self.url, "Fetching Live API credentials");

        let mut request = self.client.get(&self.url).timeout(self.timeout);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Credentials(format!("token request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SessionError::Auth(format!(
                "token endpoint rejected the request with HTTP {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Credentials(format!("HTTP {status} - {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Credentials(format!("invalid token response: {e}")))?;

        if body.api_key.trim().is_empty() {
            return Err(SessionError::Credentials(
                "token response contained an empty apiKey".to_string(),
            ));
        }

        Ok(Credentials::new(body.api_key, body.model))
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn get_credentials(&self) -> SessionResult<Credentials> {
        if let Some(credentials) = self.cached() {
            return Ok(credentials);
        }

        let credentials = self.fetch().await?;
        *self.cache.lock() = Some(CachedCredentials {
            credentials: credentials.clone(),
            fetched_at: Instant::now(),
        });
        Ok(credentials)
    }

    fn invalidate(&self) {
        if self.cache.lock().take().is_some() {
            warn!(url = %self.url, "Cached credentials invalidated");
        }
    }
}
