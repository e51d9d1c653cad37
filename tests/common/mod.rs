//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use scry_auth::auth::{
    AdapterRegistry, AdapterResult, BrowserOpener, CallbackListener, CallbackParams,
    LocalCallbackListener, OAuthConfig, OAuthManager, OAuthSettings, PendingCallback,
    ProviderAdapter, SecureCredentialStore, TokenSet,
};
use scry_auth::{AdapterError, ProviderId, Result};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

/// Adapter that answers from a script and counts every network-shaped call.
pub struct ScriptedAdapter {
    provider: ProviderId,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    refresh_failure: Mutex<Option<AdapterError>>,
    refresh_delay: StdDuration,
    pub seen_verifiers: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            refresh_failure: Mutex::new(None),
            refresh_delay: StdDuration::from_millis(0),
            seen_verifiers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh_delay(mut self, delay: StdDuration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn fail_refresh_with(&self, err: AdapterError) {
        *self.refresh_failure.lock().unwrap() = Some(err);
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn oauth_config(&self) -> AdapterResult<OAuthConfig> {
        Ok(OAuthConfig {
            client_id: "test-client".to_string(),
            client_secret: None,
            authorization_endpoint: "https://auth.example.test/authorize".to_string(),
            token_endpoint: "https://auth.example.test/token".to_string(),
            revocation_endpoint: None,
            scopes: vec!["openid".to_string(), "email".to_string()],
            callback_path: "/callback".to_string(),
            extra_params: vec![("access_type".to_string(), "offline".to_string())],
        })
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
        _redirect_uri: &str,
    ) -> AdapterResult<TokenSet> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_verifiers
            .lock()
            .unwrap()
            .push(code_verifier.to_string());
        Ok(TokenSet::bearer(
            format!("access-for-{}", code),
            Some("refresh-1".to_string()),
            Duration::hours(1),
        )
        .unwrap())
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> AdapterResult<TokenSet> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if let Some(err) = self.refresh_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(TokenSet::bearer(format!("refreshed-{}", n), None, Duration::hours(1)).unwrap())
    }

    async fn revoke_tokens(&self, _tokens: &TokenSet) -> AdapterResult<()> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Browser that never goes anywhere.
pub struct NoopBrowser;

impl BrowserOpener for NoopBrowser {
    fn open(&self, _url: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no browser in tests"))
    }
}

/// Browser that plays the authorization server: it reads the URL it was
/// given and immediately redirects to the callback.
pub struct RedirectingBrowser {
    code: String,
    forced_state: Option<String>,
    deny: bool,
    pub opened: Mutex<Vec<String>>,
}

impl RedirectingBrowser {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            forced_state: None,
            deny: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Echo `state` instead of the value from the authorization URL.
    pub fn with_state(mut self, state: &str) -> Self {
        self.forced_state = Some(state.to_string());
        self
    }

    /// Redirect with `error=access_denied` instead of a code.
    pub fn denying(mut self) -> Self {
        self.deny = true;
        self
    }

    pub fn last_url(&self) -> Option<reqwest::Url> {
        self.opened
            .lock()
            .unwrap()
            .last()
            .map(|url| reqwest::Url::parse(url).unwrap())
    }
}

pub fn query_param(url: &reqwest::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl BrowserOpener for RedirectingBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        let parsed = reqwest::Url::parse(url).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let redirect_uri = query_param(&parsed, "redirect_uri").unwrap();
        let state = self
            .forced_state
            .clone()
            .or_else(|| query_param(&parsed, "state"))
            .unwrap();
        let query = if self.deny {
            vec![
                ("error", "access_denied".to_string()),
                ("error_description", "The user denied access".to_string()),
                ("state", state),
            ]
        } else {
            vec![("code", self.code.clone()), ("state", state)]
        };

        tokio::spawn(async move {
            let _ = local_client().get(redirect_uri).query(&query).send().await;
        });
        Ok(())
    }
}

/// Wraps the real listener and counts how often endpoints are stopped.
#[derive(Default)]
pub struct CountingListener {
    pub stops: Arc<AtomicUsize>,
}

impl CountingListener {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct CountingPending {
    inner: Box<dyn PendingCallback>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl CallbackListener for CountingListener {
    async fn start(&self, callback_path: &str) -> Result<Box<dyn PendingCallback>> {
        let inner = LocalCallbackListener.start(callback_path).await?;
        Ok(Box::new(CountingPending {
            inner,
            stops: Arc::clone(&self.stops),
        }))
    }
}

#[async_trait]
impl PendingCallback for CountingPending {
    fn port(&self) -> u16 {
        self.inner.port()
    }

    async fn wait(&mut self, timeout: StdDuration) -> Result<CallbackParams> {
        self.inner.wait(timeout).await
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }
}

pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// OAuth manager over an in-memory store with `adapter` registered.
pub fn oauth_manager(adapter: Arc<ScriptedAdapter>) -> OAuthManager {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    OAuthManager::new(SecureCredentialStore::in_memory(), registry)
        .with_browser(Arc::new(NoopBrowser))
        .with_settings(OAuthSettings {
            callback_timeout: StdDuration::from_secs(5),
        })
}

/// Store tokens for `provider` expiring `lifetime` from now.
pub async fn seed_tokens(manager: &OAuthManager, provider: ProviderId, access: &str, lifetime: Duration) {
    let tokens = TokenSet::bearer(access, Some("refresh-0".to_string()), lifetime).unwrap();
    manager.store().store_tokens(provider, &tokens).await.unwrap();
}
