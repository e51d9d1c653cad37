mod common;

use common::{query_param, CountingListener, NoopBrowser, RedirectingBrowser, ScriptedAdapter};
use scry_auth::auth::{
    compute_challenge, AdapterRegistry, AuthConfig, AuthMethod, AuthenticationManager, OAuthManager,
    OAuthSettings, SecureCredentialStore,
};
use scry_auth::{AuthError, ErrorKind, ProviderId};
use std::sync::Arc;
use std::time::Duration;

const GOOGLE: ProviderId = ProviderId::Google;

struct Harness {
    adapter: Arc<ScriptedAdapter>,
    listener: Arc<CountingListener>,
    manager: Arc<OAuthManager>,
}

fn harness(browser: Arc<dyn scry_auth::auth::BrowserOpener>, timeout: Duration) -> Harness {
    let adapter = Arc::new(ScriptedAdapter::new(GOOGLE));
    let listener = Arc::new(CountingListener::default());
    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone());

    let manager = OAuthManager::new(SecureCredentialStore::in_memory(), registry)
        .with_listener(listener.clone())
        .with_browser(browser)
        .with_settings(OAuthSettings {
            callback_timeout: timeout,
        });
    Harness {
        adapter,
        listener,
        manager: Arc::new(manager),
    }
}

#[tokio::test]
async fn test_flow_exchanges_code_and_stores_tokens() {
    let browser = Arc::new(RedirectingBrowser::new("auth-code-1"));
    let h = harness(browser.clone(), Duration::from_secs(5));

    let tokens = h.manager.initiate_flow(GOOGLE).await.unwrap();
    assert_eq!(tokens.access_token(), "access-for-auth-code-1");

    let stored = h.manager.get_tokens(GOOGLE).await.unwrap().unwrap();
    assert_eq!(stored, tokens);
    assert_eq!(h.adapter.exchanges(), 1);
    assert_eq!(h.listener.stops(), 1);
    assert_eq!(h.manager.active_flow(), None);

    let url = browser.last_url().unwrap();
    assert_eq!(url.host_str(), Some("auth.example.test"));
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&url, "client_id").as_deref(), Some("test-client"));
    assert_eq!(query_param(&url, "scope").as_deref(), Some("openid email"));
    assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(query_param(&url, "access_type").as_deref(), Some("offline"));
    let redirect = query_param(&url, "redirect_uri").unwrap();
    assert!(redirect.starts_with("http://localhost:"));
    assert!(redirect.ends_with("/callback"));

    // The verifier handed to the adapter must match the challenge in the URL.
    let verifier = h.adapter.seen_verifiers.lock().unwrap()[0].clone();
    assert_eq!(
        query_param(&url, "code_challenge").unwrap(),
        compute_challenge(&verifier)
    );
}

#[tokio::test]
async fn test_state_mismatch_aborts_before_exchange() {
    let browser = Arc::new(RedirectingBrowser::new("auth-code-1").with_state("forged-state"));
    let h = harness(browser, Duration::from_secs(5));

    let err = h.manager.initiate_flow(GOOGLE).await.unwrap_err();
    assert!(matches!(err, AuthError::StateMismatch));
    assert_eq!(err.kind(), ErrorKind::Csrf);
    assert_eq!(h.adapter.exchanges(), 0);
    assert!(h.manager.get_tokens(GOOGLE).await.unwrap().is_none());
    assert_eq!(h.listener.stops(), 1);
    assert_eq!(h.manager.active_flow(), None);
}

#[tokio::test]
async fn test_callback_timeout_cleans_up() {
    let h = harness(Arc::new(NoopBrowser), Duration::from_millis(150));

    let err = h.manager.initiate_flow(GOOGLE).await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout(_)));
    assert!(err.is_retryable());
    assert_eq!(h.listener.stops(), 1);
    assert_eq!(h.manager.active_flow(), None);

    // The slot is free again.
    let err = h.manager.initiate_flow(GOOGLE).await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout(_)));
    assert_eq!(h.listener.stops(), 2);
}

#[tokio::test]
async fn test_second_flow_is_rejected_while_first_runs() {
    let h = harness(Arc::new(NoopBrowser), Duration::from_secs(30));

    let first = {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.initiate_flow(GOOGLE).await })
    };
    for _ in 0..100 {
        if h.manager.active_flow().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.manager.active_flow(), Some(GOOGLE));
    assert!(h.manager.status(GOOGLE).await.unwrap().flow_in_progress);

    let err = h.manager.initiate_flow(GOOGLE).await.unwrap_err();
    assert!(matches!(err, AuthError::FlowInProgress(ProviderId::Google)));

    // Cancelling the first flow releases the slot and stops its listener.
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());
    assert_eq!(h.manager.active_flow(), None);
    assert_eq!(h.listener.stops(), 1);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let h = harness(Arc::new(NoopBrowser), Duration::from_secs(1));
    h.manager.cleanup();
    h.manager.cleanup();
    assert_eq!(h.manager.active_flow(), None);
}

#[tokio::test]
async fn test_denied_authorization_is_reported() {
    let browser = Arc::new(RedirectingBrowser::new("unused").denying());
    let h = harness(browser, Duration::from_secs(5));

    let err = h.manager.initiate_flow(GOOGLE).await.unwrap_err();
    assert!(matches!(err, AuthError::AuthorizationDenied(ref detail) if detail.starts_with("access_denied")));
    assert_eq!(h.adapter.exchanges(), 0);
    assert_eq!(h.listener.stops(), 1);
}

#[tokio::test]
async fn test_authenticate_can_start_interactive_login() {
    let browser = Arc::new(RedirectingBrowser::new("interactive"));
    let h = harness(browser, Duration::from_secs(5));
    let manager = AuthenticationManager::new(Arc::clone(&h.manager)).with_interactive_login(true);
    manager.configure_provider(
        GOOGLE,
        AuthConfig {
            preferred_method: AuthMethod::OAuth,
            oauth_enabled: true,
            api_key: None,
            enable_fallback: false,
        },
    );

    let result = manager.authenticate(GOOGLE).await;
    assert!(result.success);
    assert_eq!(result.credential.as_deref(), Some("access-for-interactive"));

    // ensure_valid_authentication never opens a browser.
    h.manager.revoke_tokens(GOOGLE).await.unwrap();
    let result = manager.ensure_valid_authentication(GOOGLE).await;
    assert!(!result.success);
    assert_eq!(h.adapter.exchanges(), 1);
}

#[tokio::test]
async fn test_login_command_runs_flow() {
    let browser = Arc::new(RedirectingBrowser::new("login"));
    let h = harness(browser, Duration::from_secs(5));
    let manager = AuthenticationManager::new(Arc::clone(&h.manager));
    manager.configure_provider(
        GOOGLE,
        AuthConfig {
            preferred_method: AuthMethod::OAuth,
            oauth_enabled: true,
            api_key: None,
            enable_fallback: false,
        },
    );

    let result = manager.login(GOOGLE).await.unwrap();
    assert!(result.success);
    assert_eq!(result.method, AuthMethod::OAuth);

    manager.logout(GOOGLE).await.unwrap();
    assert!(h.manager.get_tokens(GOOGLE).await.unwrap().is_none());
    assert_eq!(h.adapter.revoke_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
