//! Google OAuth 2.0 (installed application flow with PKCE).

use async_trait::async_trait;

use crate::auth::adapter::{AdapterResult, OAuthConfig, ProviderAdapter, TokenEndpoint};
use crate::auth::token::TokenSet;
use crate::error::AdapterError;
use crate::provider::ProviderId;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

const SCOPES: &[&str] = &[
    "openid",
    "email",
    "https://www.googleapis.com/auth/cloud-platform",
];

/// Google adapter.
///
/// Google only issues a refresh token when asked for offline access with
/// explicit consent, hence the extra authorization parameters.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    config: OAuthConfig,
    endpoint: TokenEndpoint,
}

impl GoogleAdapter {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>, endpoint: TokenEndpoint) -> Self {
        Self {
            config: OAuthConfig {
                client_id: client_id.into(),
                client_secret: client_secret.filter(|s| !s.is_empty()),
                authorization_endpoint: AUTH_URL.to_string(),
                token_endpoint: TOKEN_URL.to_string(),
                revocation_endpoint: Some(REVOKE_URL.to_string()),
                scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
                callback_path: "/callback".to_string(),
                extra_params: vec![
                    ("access_type".to_string(), "offline".to_string()),
                    ("prompt".to_string(), "consent".to_string()),
                ],
            },
            endpoint,
        }
    }

    /// Point the adapter at different endpoints (staging, local test servers).
    pub fn with_endpoints(
        mut self,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        revocation_endpoint: Option<String>,
    ) -> Self {
        self.config.authorization_endpoint = authorization_endpoint.into();
        self.config.token_endpoint = token_endpoint.into();
        self.config.revocation_endpoint = revocation_endpoint;
        self
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Google
    }

    fn oauth_config(&self) -> AdapterResult<OAuthConfig> {
        if self.config.client_id.trim().is_empty() {
            return Err(AdapterError::configuration(
                "Google OAuth client ID is not configured (set providers.google.client_id)",
            ));
        }
        Ok(self.config.clone())
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AdapterResult<TokenSet> {
        let config = self.oauth_config()?;
        self.endpoint
            .exchange_code(&config, code, code_verifier, redirect_uri)
            .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> AdapterResult<TokenSet> {
        let config = self.oauth_config()?;
        self.endpoint.refresh(&config, refresh_token).await
    }

    async fn revoke_tokens(&self, tokens: &TokenSet) -> AdapterResult<()> {
        let Some(url) = self.config.revocation_endpoint.as_deref() else {
            return Ok(());
        };
        // Revoking the refresh token also invalidates its access tokens.
        let token = tokens
            .refresh_token
            .as_deref()
            .unwrap_or_else(|| tokens.access_token());
        self.endpoint.revoke(url, token).await
    }
}
