//! OpenRouter OAuth PKCE flow.
//!
//! OpenRouter exchanges the authorization code for a user-controlled API key
//! rather than an access/refresh token pair. The key does not expire and
//! cannot be refreshed; a new one is obtained by logging in again.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::adapter::{
    error_from_response, AdapterResult, OAuthConfig, ProviderAdapter, TokenEndpoint,
};
use crate::auth::pkce::CHALLENGE_METHOD;
use crate::auth::token::{TokenSet, BEARER};
use crate::error::AdapterError;
use crate::provider::ProviderId;

const AUTH_URL: &str = "https://openrouter.ai/auth";
const KEYS_URL: &str = "https://openrouter.ai/api/v1/auth/keys";

/// Client identifier sent on the authorization URL.
const CLIENT_ID: &str = "scry-cli";

/// Expiry recorded for OpenRouter keys, which never expire on their own.
const KEY_LIFETIME_DAYS: i64 = 365;

/// Key prefix used by OpenRouter.
const KEY_PREFIX: &str = "sk-or-";

#[derive(Debug, Serialize)]
struct KeyRequest<'a> {
    code: &'a str,
    code_verifier: &'a str,
    code_challenge_method: &'a str,
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    key: String,
}

/// OpenRouter adapter.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    config: OAuthConfig,
    endpoint: TokenEndpoint,
}

impl OpenRouterAdapter {
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self {
            config: OAuthConfig {
                client_id: CLIENT_ID.to_string(),
                client_secret: None,
                authorization_endpoint: AUTH_URL.to_string(),
                token_endpoint: KEYS_URL.to_string(),
                revocation_endpoint: None,
                scopes: Vec::new(),
                callback_path: "/callback".to_string(),
                extra_params: Vec::new(),
            },
            endpoint,
        }
    }

    pub fn with_endpoints(
        mut self,
        authorization_endpoint: impl Into<String>,
        keys_endpoint: impl Into<String>,
    ) -> Self {
        self.config.authorization_endpoint = authorization_endpoint.into();
        self.config.token_endpoint = keys_endpoint.into();
        self
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn oauth_config(&self) -> AdapterResult<OAuthConfig> {
        Ok(self.config.clone())
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
        _redirect_uri: &str,
    ) -> AdapterResult<TokenSet> {
        let request = KeyRequest {
            code,
            code_verifier,
            code_challenge_method: CHALLENGE_METHOD,
        };

        let response = self
            .endpoint
            .client()
            .post(&self.config.token_endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &body, "Key exchange failed"));
        }

        let parsed: KeyResponse = serde_json::from_str(&body).map_err(|e| {
            AdapterError::transient(format!("Failed to parse key response: {}", e))
        })?;

        TokenSet::new(
            parsed.key,
            None,
            Utc::now() + Duration::days(KEY_LIFETIME_DAYS),
            BEARER,
            None,
        )
        .map_err(|e| AdapterError::transient(e.to_string()))
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> AdapterResult<TokenSet> {
        Err(AdapterError::terminal(
            "OpenRouter keys cannot be refreshed; log in again to issue a new key",
        ))
    }

    async fn revoke_tokens(&self, _tokens: &TokenSet) -> AdapterResult<()> {
        // No revocation endpoint; keys are managed from the OpenRouter dashboard.
        Ok(())
    }

    fn validate_tokens(&self, tokens: &TokenSet) -> bool {
        tokens.access_token().starts_with(KEY_PREFIX)
    }
}
