//! Adapter for providers without OAuth support.

use async_trait::async_trait;

use crate::auth::adapter::{AdapterResult, OAuthConfig, ProviderAdapter};
use crate::auth::token::TokenSet;
use crate::error::AdapterError;
use crate::provider::ProviderId;

/// Fails every OAuth operation with a pointer to API-key authentication.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedAdapter {
    provider: ProviderId,
}

impl UnsupportedAdapter {
    pub fn new(provider: ProviderId) -> Self {
        Self { provider }
    }

    fn error(&self) -> AdapterError {
        AdapterError::configuration(format!(
            "OAuth is not yet supported for {}; use an API key (set {}) instead",
            self.provider.display_name(),
            self.provider.env_var_name()
        ))
    }
}

#[async_trait]
impl ProviderAdapter for UnsupportedAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn supports_oauth(&self) -> bool {
        false
    }

    fn oauth_config(&self) -> AdapterResult<OAuthConfig> {
        Err(self.error())
    }

    async fn exchange_code_for_tokens(
        &self,
        _code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> AdapterResult<TokenSet> {
        Err(self.error())
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> AdapterResult<TokenSet> {
        Err(self.error())
    }

    async fn revoke_tokens(&self, _tokens: &TokenSet) -> AdapterResult<()> {
        Err(self.error())
    }

    fn validate_tokens(&self, _tokens: &TokenSet) -> bool {
        false
    }
}
