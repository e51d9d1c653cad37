//! Provider adapter contract and registry.
//!
//! An adapter knows one provider's OAuth endpoints and how to turn its
//! token-endpoint responses into a [`TokenSet`]. The OAuth manager only ever
//! talks to providers through this trait.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::debug;

use super::token::{TokenErrorResponse, TokenResponse, TokenSet};
use crate::error::{AdapterError, ErrorKind};
use crate::provider::ProviderId;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Static OAuth settings for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Sent on token requests when the provider requires one (installed apps).
    pub client_secret: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub scopes: Vec<String>,
    /// Path the local callback listener serves; the redirect URI is
    /// `http://localhost:{port}{callback_path}`.
    pub callback_path: String,
    /// Additional authorization URL parameters, in order.
    pub extra_params: Vec<(String, String)>,
}

impl OAuthConfig {
    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://localhost:{}{}", port, self.callback_path)
    }

    /// Build the authorization URL the user is sent to.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str, code_challenge: &str) -> String {
        let scope = self.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", super::pkce::CHALLENGE_METHOD),
        ];
        params.extend(self.extra_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if self.authorization_endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.authorization_endpoint, separator, query)
    }
}

/// One provider's OAuth implementation.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Whether this provider can be reached via OAuth at all.
    fn supports_oauth(&self) -> bool {
        true
    }

    fn oauth_config(&self) -> AdapterResult<OAuthConfig>;

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AdapterResult<TokenSet>;

    async fn refresh_access_token(&self, refresh_token: &str) -> AdapterResult<TokenSet>;

    async fn revoke_tokens(&self, tokens: &TokenSet) -> AdapterResult<()>;

    /// Shape check on tokens returned by the provider.
    fn validate_tokens(&self, tokens: &TokenSet) -> bool {
        !tokens.access_token().trim().is_empty()
            && !tokens.access_token().chars().any(char::is_whitespace)
    }
}

/// Adapters keyed by provider. Only changed through `register`/`unregister`.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, returning the one it replaced.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Option<Arc<dyn ProviderAdapter>> {
        let provider = adapter.provider();
        debug!(%provider, "Registered OAuth adapter");
        self.adapters.insert(provider, adapter)
    }

    pub fn unregister(&mut self, provider: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.remove(&provider)
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn contains(&self, provider: ProviderId) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Registered providers, sorted.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// HTTP client for standard OAuth token and revocation endpoints.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: Client,
}

impl TokenEndpoint {
    pub fn new(timeout: StdDuration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `grant_type=authorization_code` exchange.
    pub async fn exchange_code(
        &self,
        config: &OAuthConfig,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AdapterResult<TokenSet> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        self.token_request(&config.token_endpoint, &form).await
    }

    /// `grant_type=refresh_token` exchange.
    pub async fn refresh(&self, config: &OAuthConfig, refresh_token: &str) -> AdapterResult<TokenSet> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        self.token_request(&config.token_endpoint, &form).await
    }

    /// Post a token to an RFC 7009 revocation endpoint.
    pub async fn revoke(&self, revocation_endpoint: &str, token: &str) -> AdapterResult<()> {
        let response = self
            .client
            .post(revocation_endpoint)
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body, "Token revocation failed"))
    }

    async fn token_request(&self, url: &str, form: &[(&str, &str)]) -> AdapterResult<TokenSet> {
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &body, "Token request failed"));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AdapterError::transient(format!("Failed to parse token response: {}", e))
        })?;
        parsed
            .into_token_set(Utc::now())
            .map_err(|e| AdapterError::transient(e.to_string()))
    }
}

/// Classify a non-2xx token endpoint response.
///
/// 5xx and 429 are transient no matter what the body says. Otherwise an
/// OAuth error code from the terminal vocabulary makes it terminal.
pub fn error_from_response(status: u16, body: &str, context: &str) -> AdapterError {
    let parsed = serde_json::from_str::<TokenErrorResponse>(body).ok();
    let message = match &parsed {
        Some(err) => format!("{} ({}): {}", context, status, err.describe()),
        None if body.trim().is_empty() => format!("{} ({})", context, status),
        None => format!("{} ({}): {}", context, status, body.trim()),
    };

    let kind = if status >= 500 || status == 429 {
        ErrorKind::Transient
    } else {
        crate::error::classify_message(parsed.as_ref().map(|e| e.error.as_str()), &message)
    };

    let mut err = AdapterError::unclassified(message)
        .with_kind(kind)
        .with_status(status);
    if let Some(parsed) = parsed {
        err = err.with_code(parsed.error);
    }
    err
}
