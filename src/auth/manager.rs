//! OAuth orchestration: interactive authorization, refresh, revocation.
//!
//! [`OAuthManager`] owns the single authorization-flow slot and the
//! per-provider refresh single-flight. It is built once by the entry point
//! and shared (`Arc<OAuthManager>`) with everything that needs tokens.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use super::adapter::{AdapterRegistry, OAuthConfig, ProviderAdapter};
use super::browser::{BrowserOpener, SystemBrowser};
use super::callback::{CallbackListener, LocalCallbackListener, PendingCallback};
use super::flow::{FlowSlot, FlowState};
use super::pkce::{constant_time_eq, generate_state, Pkce};
use super::single_flight::SingleFlight;
use super::storage::SecureCredentialStore;
use super::token::{redact, TokenSet};
use crate::error::{AuthError, ErrorKind, Result};
use crate::provider::ProviderId;

/// Default time to wait for the browser redirect.
pub const DEFAULT_CALLBACK_TIMEOUT: StdDuration = StdDuration::from_secs(300);

/// Tunables for the OAuth manager.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub callback_timeout: StdDuration,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// Read-side summary of a provider's OAuth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthStatus {
    pub provider: ProviderId,
    pub has_tokens: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
    pub time_until_expiration: Option<Duration>,
    pub scope: Option<String>,
    pub flow_in_progress: bool,
}

/// OAuth orchestrator.
pub struct OAuthManager {
    registry: RwLock<AdapterRegistry>,
    store: SecureCredentialStore,
    listener: Arc<dyn CallbackListener>,
    browser: Arc<dyn BrowserOpener>,
    settings: OAuthSettings,
    flow: Mutex<FlowSlot>,
    next_flow_id: AtomicU64,
    refreshes: SingleFlight<ProviderId, Result<TokenSet>>,
}

impl OAuthManager {
    /// Manager using the local callback listener and the system browser.
    pub fn new(store: SecureCredentialStore, registry: AdapterRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            store,
            listener: Arc::new(LocalCallbackListener),
            browser: Arc::new(SystemBrowser),
            settings: OAuthSettings::default(),
            flow: Mutex::new(FlowSlot::Idle),
            next_flow_id: AtomicU64::new(1),
            refreshes: SingleFlight::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CallbackListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_settings(mut self, settings: OAuthSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &SecureCredentialStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Adapter registry
    // ------------------------------------------------------------------

    pub fn register_adapter(&self, adapter: Arc<dyn ProviderAdapter>) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(adapter);
    }

    pub fn unregister_adapter(&self, provider: ProviderId) -> bool {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(provider)
            .is_some()
    }

    pub fn registered_providers(&self) -> Vec<ProviderId> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .providers()
    }

    fn adapter(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .ok_or(AuthError::AdapterNotRegistered(provider))
    }

    /// An adapter is registered and it supports OAuth.
    pub fn is_provider_supported(&self, provider: ProviderId) -> bool {
        self.adapter(provider)
            .map(|adapter| adapter.supports_oauth())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Interactive authorization
    // ------------------------------------------------------------------

    /// Run the authorization-code flow with PKCE for `provider`.
    ///
    /// Only one flow may run per manager; a concurrent call fails with
    /// [`AuthError::FlowInProgress`]. The listener is stopped and the flow
    /// slot released on every exit path, including cancellation.
    pub async fn initiate_flow(&self, provider: ProviderId) -> Result<TokenSet> {
        let adapter = self.adapter(provider)?;
        if !adapter.supports_oauth() {
            return Err(AuthError::OAuthUnsupported(provider));
        }
        let config = adapter
            .oauth_config()
            .map_err(|e| AuthError::adapter(provider, e))?;
        if config.client_id.trim().is_empty() {
            return Err(AuthError::MissingClientId(provider));
        }

        let pkce = Pkce::new();
        let flow = FlowState {
            id: self.next_flow_id.fetch_add(1, Ordering::Relaxed),
            provider,
            state: generate_state(),
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
        };

        let mut guard = FlowGuard::begin(&self.flow, flow.clone())?;
        info!(%provider, "Starting OAuth authorization flow");

        let result = self.run_flow(adapter.as_ref(), &config, &flow, &mut guard).await;
        guard.cleanup();

        match &result {
            Ok(tokens) => info!(
                %provider,
                expires_at = %tokens.expires_at,
                "OAuth authorization complete"
            ),
            Err(e) => warn!(%provider, error = %e, "OAuth authorization failed"),
        }
        result
    }

    async fn run_flow(
        &self,
        adapter: &dyn ProviderAdapter,
        config: &OAuthConfig,
        flow: &FlowState,
        guard: &mut FlowGuard<'_>,
    ) -> Result<TokenSet> {
        let provider = flow.provider;
        let pending = guard.attach(self.listener.start(&config.callback_path).await?);
        let redirect_uri = config.redirect_uri(pending.port());
        let url = config.authorization_url(&redirect_uri, &flow.state, &flow.code_challenge);
        debug!(%provider, port = pending.port(), "Awaiting OAuth callback");

        if let Err(e) = self.browser.open(&url) {
            warn!(%provider, error = %e, "Could not open a browser; open the authorization URL manually");
        }

        let callback = pending.wait(self.settings.callback_timeout).await?;
        if !constant_time_eq(&callback.state, &flow.state) {
            warn!(%provider, "OAuth callback state did not match");
            return Err(AuthError::StateMismatch);
        }
        debug!(%provider, "Callback state verified, exchanging code");

        let tokens = adapter
            .exchange_code_for_tokens(&callback.code, &flow.code_verifier, &redirect_uri)
            .await
            .map_err(|e| AuthError::adapter(provider, e))?;
        if !adapter.validate_tokens(&tokens) {
            return Err(AuthError::InvalidTokens(format!(
                "{} rejected the token shape returned by the exchange",
                provider.display_name()
            )));
        }

        self.store.store_tokens(provider, &tokens).await?;
        Ok(tokens)
    }

    /// Provider of the flow currently in progress, if any.
    pub fn active_flow(&self) -> Option<ProviderId> {
        lock_slot(&self.flow).active_provider()
    }

    /// Discard the active flow state. Safe to call when idle.
    pub fn cleanup(&self) {
        if let Some(flow) = lock_slot(&self.flow).clear() {
            debug!(provider = %flow.provider, "Discarded OAuth flow state");
        }
    }

    // ------------------------------------------------------------------
    // Token lifecycle
    // ------------------------------------------------------------------

    /// Return usable tokens, refreshing them first if they are inside the
    /// refresh buffer. Valid tokens are returned without any network call.
    pub async fn ensure_valid_tokens(&self, provider: ProviderId) -> Result<TokenSet> {
        let adapter = self.adapter(provider)?;
        let current = self
            .store
            .get_tokens(provider)
            .await?
            .ok_or(AuthError::NoTokens(provider))?;

        if !current.needs_refresh_at(Utc::now()) {
            return Ok(current);
        }
        if current.refresh_token.is_none() {
            return Err(AuthError::NoRefreshToken(provider));
        }

        debug!(%provider, expires_at = %current.expires_at, "Access token needs refresh");
        self.shared_refresh(provider, adapter, false).await
    }

    /// Bearer credential for `provider`, refreshed if needed.
    pub async fn access_token(&self, provider: ProviderId) -> Result<String> {
        Ok(self
            .ensure_valid_tokens(provider)
            .await?
            .access_token()
            .to_string())
    }

    /// Refresh now, regardless of expiry.
    pub async fn refresh_tokens(&self, provider: ProviderId) -> Result<TokenSet> {
        let adapter = self.adapter(provider)?;
        self.shared_refresh(provider, adapter, true).await
    }

    /// Refresh through the per-provider single-flight. Callers arriving while
    /// a refresh is running get that refresh's outcome.
    async fn shared_refresh(
        &self,
        provider: ProviderId,
        adapter: Arc<dyn ProviderAdapter>,
        force: bool,
    ) -> Result<TokenSet> {
        let store = self.store.clone();
        self.refreshes
            .run(provider, move || async move {
                let current = store
                    .get_tokens(provider)
                    .await?
                    .ok_or(AuthError::NoTokens(provider))?;
                // Someone may have refreshed between our read and this one.
                if !force && !current.needs_refresh_at(Utc::now()) {
                    return Ok(current);
                }
                refresh_with(adapter.as_ref(), &store, provider, current).await
            })
            .await
    }

    /// Revoke remotely (best effort) and always clear local tokens.
    pub async fn revoke_tokens(&self, provider: ProviderId) -> Result<()> {
        match self.store.get_tokens(provider).await {
            Ok(Some(tokens)) => match self.adapter(provider) {
                Ok(adapter) => match adapter.revoke_tokens(&tokens).await {
                    Ok(()) => info!(%provider, "Revoked OAuth tokens"),
                    Err(e) => warn!(%provider, error = %e, "Token revocation failed; clearing local tokens anyway"),
                },
                Err(e) => warn!(%provider, error = %e, "Skipping remote revocation"),
            },
            Ok(None) => {}
            Err(e) => warn!(%provider, error = %e, "Could not read tokens to revoke; clearing local tokens anyway"),
        }
        self.store.clear_tokens(provider).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-side helpers
    // ------------------------------------------------------------------

    pub async fn get_tokens(&self, provider: ProviderId) -> Result<Option<TokenSet>> {
        self.store.get_tokens(provider).await
    }

    /// True when stored tokens expire within the refresh buffer (or already
    /// have). False when nothing is stored.
    pub async fn needs_token_refresh(&self, provider: ProviderId) -> Result<bool> {
        Ok(self
            .store
            .get_tokens(provider)
            .await?
            .is_some_and(|tokens| tokens.needs_refresh_at(Utc::now())))
    }

    /// Time until stored tokens expire, floored at zero. `None` when nothing
    /// is stored.
    pub async fn time_until_expiration(&self, provider: ProviderId) -> Result<Option<Duration>> {
        Ok(self
            .store
            .get_tokens(provider)
            .await?
            .map(|tokens| tokens.time_until_expiration_at(Utc::now())))
    }

    pub async fn status(&self, provider: ProviderId) -> Result<OAuthStatus> {
        let tokens = self.store.get_tokens(provider).await?;
        let now = Utc::now();
        Ok(OAuthStatus {
            provider,
            has_tokens: tokens.is_some(),
            has_refresh_token: tokens
                .as_ref()
                .is_some_and(|t| t.refresh_token.is_some()),
            expires_at: tokens.as_ref().map(|t| t.expires_at),
            needs_refresh: tokens.as_ref().is_some_and(|t| t.needs_refresh_at(now)),
            time_until_expiration: tokens.as_ref().map(|t| t.time_until_expiration_at(now)),
            scope: tokens.and_then(|t| t.scope),
            flow_in_progress: self.active_flow() == Some(provider),
        })
    }
}

/// Exchange the refresh token and classify the outcome.
///
/// Terminal failures purge the stored tokens; anything else leaves them as
/// they were.
async fn refresh_with(
    adapter: &dyn ProviderAdapter,
    store: &SecureCredentialStore,
    provider: ProviderId,
    current: TokenSet,
) -> Result<TokenSet> {
    let Some(refresh_token) = current.refresh_token.as_deref() else {
        return Err(AuthError::NoRefreshToken(provider));
    };
    debug!(%provider, refresh_token = %redact(refresh_token), "Refreshing access token");

    match adapter.refresh_access_token(refresh_token).await {
        Ok(fresh) => {
            let tokens = fresh.inherit_refresh_token(&current);
            if !adapter.validate_tokens(&tokens) {
                return Err(AuthError::InvalidTokens(format!(
                    "{} rejected the token shape returned by refresh",
                    provider.display_name()
                )));
            }
            store.store_tokens(provider, &tokens).await?;
            info!(%provider, expires_at = %tokens.expires_at, "Refreshed OAuth tokens");
            Ok(tokens)
        }
        Err(e) if e.kind() == ErrorKind::Terminal => {
            warn!(%provider, error = %e, "Refresh token rejected; clearing stored tokens");
            if let Err(clear_err) = store.clear_tokens(provider).await {
                warn!(%provider, error = %clear_err, "Failed to clear rejected tokens");
            }
            Err(AuthError::RefreshTokenExpired {
                provider,
                reason: e.message,
            })
        }
        Err(e) => {
            warn!(%provider, error = %e, "Token refresh failed; keeping stored tokens");
            Err(AuthError::adapter(provider, e))
        }
    }
}

fn lock_slot(slot: &Mutex<FlowSlot>) -> MutexGuard<'_, FlowSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the flow slot and the callback listener for one flow. Cleanup runs
/// once, either explicitly or on drop.
struct FlowGuard<'a> {
    slot: &'a Mutex<FlowSlot>,
    flow_id: u64,
    pending: Option<Box<dyn PendingCallback>>,
    cleaned: bool,
}

impl<'a> FlowGuard<'a> {
    fn begin(slot: &'a Mutex<FlowSlot>, flow: FlowState) -> Result<Self> {
        let flow_id = flow.id;
        lock_slot(slot).begin(flow)?;
        Ok(Self {
            slot,
            flow_id,
            pending: None,
            cleaned: false,
        })
    }

    fn attach(&mut self, pending: Box<dyn PendingCallback>) -> &mut Box<dyn PendingCallback> {
        self.pending.insert(pending)
    }

    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if let Some(mut pending) = self.pending.take() {
            pending.stop();
        }
        lock_slot(self.slot).end(self.flow_id);
        debug!(flow_id = self.flow_id, "OAuth flow cleaned up");
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
