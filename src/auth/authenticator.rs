//! Method selection between OAuth and static API keys.
//!
//! [`AuthenticationManager`] sits on top of [`OAuthManager`]. For each
//! provider it holds an [`AuthConfig`] and decides which credential to hand
//! back, trying the non-preferred method only when fallback is enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::manager::{OAuthManager, OAuthStatus};
use crate::error::{AuthError, ErrorKind, Result};
use crate::provider::ProviderId;

/// How a credential was (or would be) obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "oauth")]
    OAuth,
    #[serde(rename = "api_key")]
    ApiKey,
    #[default]
    #[serde(rename = "none")]
    None,
}

impl AuthMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth => "oauth",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::None => "none",
        }
    }

    /// The other real method. `None` has no alternate.
    pub const fn alternate(&self) -> AuthMethod {
        match self {
            AuthMethod::OAuth => AuthMethod::ApiKey,
            AuthMethod::ApiKey => AuthMethod::OAuth,
            AuthMethod::None => AuthMethod::None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider authentication settings. Read-only to this module.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub preferred_method: AuthMethod,
    pub oauth_enabled: bool,
    pub api_key: Option<String>,
    pub enable_fallback: bool,
}

impl AuthConfig {
    /// API key, if present and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("preferred_method", &self.preferred_method)
            .field("oauth_enabled", &self.oauth_enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("enable_fallback", &self.enable_fallback)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            preferred_method: AuthMethod::ApiKey,
            oauth_enabled: false,
            api_key: None,
            enable_fallback: false,
        }
    }
}

/// Outcome of `authenticate` / `ensure_valid_authentication`.
///
/// A successful result always carries a non-empty credential and a method
/// other than [`AuthMethod::None`].
#[derive(Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub method: AuthMethod,
    pub credential: Option<String>,
    pub used_fallback: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl AuthResult {
    fn granted(method: AuthMethod, credential: String, used_fallback: bool) -> Self {
        Self {
            success: true,
            method,
            credential: Some(credential),
            used_fallback,
            error: None,
            error_kind: None,
        }
    }

    fn failed(error: &AuthError) -> Self {
        Self {
            success: false,
            method: AuthMethod::None,
            credential: None,
            used_fallback: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    /// Whether the failure can only be fixed by logging in again.
    pub fn requires_reauthentication(&self) -> bool {
        self.error_kind == Some(ErrorKind::Terminal)
    }
}

impl fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResult")
            .field("success", &self.success)
            .field("method", &self.method)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("used_fallback", &self.used_fallback)
            .field("error", &self.error)
            .field("error_kind", &self.error_kind)
            .finish()
    }
}

/// Read-only view of a provider's authentication state. No network calls
/// are made to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub provider: ProviderId,
    pub authenticated: bool,
    pub current_method: AuthMethod,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub has_api_key: bool,
    pub fallback_available: bool,
    pub oauth_status: Option<OAuthStatus>,
}

/// Policy layer choosing between OAuth and API keys.
pub struct AuthenticationManager {
    oauth: Arc<OAuthManager>,
    configs: RwLock<HashMap<ProviderId, AuthConfig>>,
    interactive_login: bool,
}

impl AuthenticationManager {
    pub fn new(oauth: Arc<OAuthManager>) -> Self {
        Self {
            oauth,
            configs: RwLock::new(HashMap::new()),
            interactive_login: false,
        }
    }

    /// Let `authenticate` start a browser login when OAuth is chosen and no
    /// tokens are stored. Off by default.
    pub fn with_interactive_login(mut self, enabled: bool) -> Self {
        self.interactive_login = enabled;
        self
    }

    pub fn oauth(&self) -> &Arc<OAuthManager> {
        &self.oauth
    }

    pub fn configure_provider(&self, provider: ProviderId, config: AuthConfig) {
        debug!(
            %provider,
            preferred = %config.preferred_method,
            oauth_enabled = config.oauth_enabled,
            has_api_key = config.api_key().is_some(),
            enable_fallback = config.enable_fallback,
            "Configured provider authentication"
        );
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider, config);
    }

    /// Providers that have an [`AuthConfig`], sorted.
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        providers.sort();
        providers
    }

    fn config(&self, provider: ProviderId) -> Result<AuthConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider)
            .cloned()
            .ok_or(AuthError::NotConfigured(provider))
    }

    fn oauth_available(&self, provider: ProviderId, config: &AuthConfig) -> bool {
        config.oauth_enabled && self.oauth.is_provider_supported(provider)
    }

    fn is_available(&self, provider: ProviderId, config: &AuthConfig, method: AuthMethod) -> bool {
        match method {
            AuthMethod::OAuth => self.oauth_available(provider, config),
            AuthMethod::ApiKey => config.api_key().is_some(),
            AuthMethod::None => false,
        }
    }

    /// Pick a credential for `provider`.
    ///
    /// With interactive login enabled, a missing token set starts the
    /// browser flow instead of counting as an OAuth failure.
    pub async fn authenticate(&self, provider: ProviderId) -> AuthResult {
        self.select(provider, self.interactive_login).await
    }

    /// Like [`authenticate`](Self::authenticate), but never opens a browser.
    /// Stale OAuth tokens are refreshed; missing ones are a failure.
    pub async fn ensure_valid_authentication(&self, provider: ProviderId) -> AuthResult {
        self.select(provider, false).await
    }

    async fn select(&self, provider: ProviderId, interactive: bool) -> AuthResult {
        let config = match self.config(provider) {
            Ok(config) => config,
            Err(e) => return AuthResult::failed(&e),
        };

        let preferred = config.preferred_method;
        let preferred_outcome = if self.is_available(provider, &config, preferred) {
            self.attempt(provider, &config, preferred, interactive).await
        } else {
            Err(self.unavailable(provider, preferred))
        };

        let preferred_err = match preferred_outcome {
            Ok(credential) => {
                debug!(%provider, method = %preferred, "Authenticated with preferred method");
                return AuthResult::granted(preferred, credential, false);
            }
            Err(e) => e,
        };

        let alternate = preferred.alternate();
        if !config.enable_fallback {
            debug!(%provider, method = %preferred, error = %preferred_err, "Preferred method failed; fallback disabled");
            return AuthResult::failed(&self.without_fallback(provider, preferred, &preferred_err));
        }
        if !self.is_available(provider, &config, alternate) {
            return AuthResult::failed(&preferred_err);
        }

        match self.attempt(provider, &config, alternate, interactive).await {
            Ok(credential) => {
                info!(
                    %provider,
                    preferred = %preferred,
                    method = %alternate,
                    reason = %preferred_err,
                    "Authenticated using fallback method"
                );
                AuthResult::granted(alternate, credential, true)
            }
            Err(e) => {
                warn!(%provider, method = %alternate, error = %e, "Fallback method failed");
                AuthResult::failed(&e)
            }
        }
    }

    async fn attempt(
        &self,
        provider: ProviderId,
        config: &AuthConfig,
        method: AuthMethod,
        interactive: bool,
    ) -> Result<String> {
        match method {
            AuthMethod::ApiKey => config
                .api_key()
                .map(str::to_string)
                .ok_or(AuthError::MissingApiKey(provider)),
            AuthMethod::OAuth => match self.oauth.ensure_valid_tokens(provider).await {
                Ok(tokens) => Ok(tokens.access_token().to_string()),
                Err(AuthError::NoTokens(_)) if interactive => {
                    info!(%provider, "No stored OAuth tokens; starting interactive login");
                    let tokens = self.oauth.initiate_flow(provider).await?;
                    Ok(tokens.access_token().to_string())
                }
                Err(e) => Err(e),
            },
            AuthMethod::None => Err(AuthError::Policy(format!(
                "No authentication method selected for {}",
                provider
            ))),
        }
    }

    fn unavailable(&self, provider: ProviderId, method: AuthMethod) -> AuthError {
        match method {
            AuthMethod::OAuth if self.oauth.is_provider_supported(provider) => {
                AuthError::Policy(format!("OAuth is disabled for {}", provider))
            }
            AuthMethod::OAuth => AuthError::OAuthUnsupported(provider),
            AuthMethod::ApiKey => AuthError::MissingApiKey(provider),
            AuthMethod::None => AuthError::Policy(format!(
                "No authentication method selected for {}",
                provider
            )),
        }
    }

    /// Wrap the preferred method's failure when the alternate is off limits.
    fn without_fallback(&self, provider: ProviderId, method: AuthMethod, cause: &AuthError) -> AuthError {
        match cause.kind() {
            // These already tell the user what to do.
            ErrorKind::Terminal | ErrorKind::Transient | ErrorKind::Csrf => cause.clone(),
            _ => AuthError::Policy(format!(
                "{} authentication failed for {} and fallback is disabled: {}",
                method, provider, cause
            )),
        }
    }

    /// Methods currently usable for `provider`, independent of preference.
    /// Never empty: `[None]` when neither is available.
    pub fn get_available_auth_methods(&self, provider: ProviderId) -> Vec<AuthMethod> {
        let Ok(config) = self.config(provider) else {
            return vec![AuthMethod::None];
        };
        let methods: Vec<_> = [AuthMethod::OAuth, AuthMethod::ApiKey]
            .into_iter()
            .filter(|method| self.is_available(provider, &config, *method))
            .collect();
        if methods.is_empty() {
            vec![AuthMethod::None]
        } else {
            methods
        }
    }

    pub async fn get_provider_auth_status(&self, provider: ProviderId) -> Result<AuthStatus> {
        let config = self.config(provider)?;
        let oauth_supported = self.oauth.is_provider_supported(provider);
        let oauth_status = if oauth_supported {
            Some(self.oauth.status(provider).await?)
        } else {
            None
        };

        // OAuth counts as ready when its tokens can still be used or renewed.
        let oauth_ready = config.oauth_enabled
            && oauth_status.as_ref().is_some_and(|status| {
                status.has_tokens && (status.has_refresh_token || !status.needs_refresh)
            });
        let ready = |method: AuthMethod| match method {
            AuthMethod::OAuth => oauth_ready,
            AuthMethod::ApiKey => config.api_key().is_some(),
            AuthMethod::None => false,
        };

        let preferred = config.preferred_method;
        let current_method = if ready(preferred) {
            preferred
        } else if config.enable_fallback && ready(preferred.alternate()) {
            preferred.alternate()
        } else {
            AuthMethod::None
        };

        let uses_oauth = current_method == AuthMethod::OAuth;
        Ok(AuthStatus {
            provider,
            authenticated: current_method != AuthMethod::None,
            current_method,
            expires_at: oauth_status
                .as_ref()
                .filter(|_| uses_oauth)
                .and_then(|status| status.expires_at),
            needs_refresh: uses_oauth
                && oauth_status.as_ref().is_some_and(|status| status.needs_refresh),
            has_api_key: config.api_key().is_some(),
            fallback_available: config.enable_fallback
                && config.api_key().is_some()
                && oauth_supported,
            oauth_status,
        })
    }

    // ------------------------------------------------------------------
    // Session commands
    // ------------------------------------------------------------------

    /// Interactive OAuth login. Refused when OAuth is disabled or
    /// unsupported for the provider.
    pub async fn login(&self, provider: ProviderId) -> Result<AuthResult> {
        let config = self.config(provider)?;
        if !self.oauth.is_provider_supported(provider) {
            return Err(AuthError::OAuthUnsupported(provider));
        }
        if !config.oauth_enabled {
            return Err(self.unavailable(provider, AuthMethod::OAuth));
        }
        let tokens = self.oauth.initiate_flow(provider).await?;
        Ok(AuthResult::granted(
            AuthMethod::OAuth,
            tokens.access_token().to_string(),
            false,
        ))
    }

    /// Revoke and clear stored OAuth tokens for `provider`.
    pub async fn logout(&self, provider: ProviderId) -> Result<()> {
        self.oauth.revoke_tokens(provider).await?;
        info!(%provider, "Logged out");
        Ok(())
    }

    /// Revoke every stored token set, then bulk clear the store. Returns the
    /// providers that had tokens.
    pub async fn logout_all(&self) -> Result<Vec<ProviderId>> {
        let stored = self.oauth.store().list_stored_providers().await?;
        for provider in &stored {
            if let Err(e) = self.oauth.revoke_tokens(*provider).await {
                warn!(%provider, error = %e, "Logout failed; clearing anyway");
            }
        }
        self.oauth.store().clear_all().await?;
        info!(count = stored.len(), "Logged out of all providers");
        Ok(stored)
    }
}
