mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};
use chrono::{Duration, Utc};
use common::local_client;
use scry_auth::auth::providers::{GoogleAdapter, OpenRouterAdapter};
use scry_auth::auth::{
    AdapterRegistry, OAuthManager, ProviderAdapter, SecureCredentialStore, TokenEndpoint, TokenSet,
};
use scry_auth::{AuthError, ErrorKind, ProviderId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Scripted token server. Each request pops the next reply.
#[derive(Clone, Default)]
struct MockServer {
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    replies: Arc<Mutex<Vec<(StatusCode, Value)>>>,
}

impl MockServer {
    fn reply(&self, status: StatusCode, body: Value) {
        self.replies.lock().unwrap().push((status, body));
    }

    fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> (StatusCode, Json<Value>) {
        let mut replies = self.replies.lock().unwrap();
        let (status, body) = if replies.is_empty() {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "no scripted reply"}))
        } else {
            replies.remove(0)
        };
        (status, Json(body))
    }

    async fn start(&self) -> String {
        let app = Router::new()
            .route("/token", post(form_handler))
            .route("/revoke", post(form_handler))
            .route("/keys", post(json_handler))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

async fn form_handler(
    State(server): State<MockServer>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    server.requests.lock().unwrap().push(form);
    server.next_reply()
}

async fn json_handler(
    State(server): State<MockServer>,
    Json(body): Json<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    server.requests.lock().unwrap().push(body);
    server.next_reply()
}

fn endpoint() -> TokenEndpoint {
    TokenEndpoint::with_client(local_client())
}

async fn google(server: &MockServer) -> GoogleAdapter {
    let base = server.start().await;
    GoogleAdapter::new("client-id", Some("client-secret".to_string()), endpoint()).with_endpoints(
        format!("{}/authorize", base),
        format!("{}/token", base),
        Some(format!("{}/revoke", base)),
    )
}

#[tokio::test]
async fn test_google_code_exchange() {
    let server = MockServer::default();
    server.reply(
        StatusCode::OK,
        json!({
            "access_token": "ya29.new",
            "expires_in": 3599,
            "refresh_token": "1//refresh",
            "scope": "openid email",
            "token_type": "bearer"
        }),
    );
    let adapter = google(&server).await;

    let before = Utc::now();
    let tokens = adapter
        .exchange_code_for_tokens("code-1", "verifier-1", "http://localhost:4242/callback")
        .await
        .unwrap();
    assert_eq!(tokens.access_token(), "ya29.new");
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
    assert!(tokens.expires_at >= before + Duration::seconds(3599));

    let request = &server.requests()[0];
    assert_eq!(request["grant_type"], "authorization_code");
    assert_eq!(request["code"], "code-1");
    assert_eq!(request["code_verifier"], "verifier-1");
    assert_eq!(request["redirect_uri"], "http://localhost:4242/callback");
    assert_eq!(request["client_id"], "client-id");
    assert_eq!(request["client_secret"], "client-secret");
}

#[tokio::test]
async fn test_google_invalid_grant_is_terminal() {
    let server = MockServer::default();
    server.reply(
        StatusCode::BAD_REQUEST,
        json!({"error": "invalid_grant", "error_description": "Token has been expired or revoked."}),
    );
    let adapter = google(&server).await;

    let err = adapter.refresh_access_token("1//dead").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Terminal);
    assert_eq!(err.code.as_deref(), Some("invalid_grant"));
    assert_eq!(server.requests()[0]["grant_type"], "refresh_token");
}

#[tokio::test]
async fn test_google_server_error_is_transient() {
    let server = MockServer::default();
    server.reply(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "backend_error"}));
    let adapter = google(&server).await;

    let err = adapter.refresh_access_token("1//live").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(err.status, Some(503));
}

#[tokio::test]
async fn test_google_revoke_sends_refresh_token() {
    let server = MockServer::default();
    server.reply(StatusCode::OK, json!({}));
    let adapter = google(&server).await;

    let tokens = TokenSet::bearer("ya29.x", Some("1//refresh".to_string()), Duration::hours(1)).unwrap();
    adapter.revoke_tokens(&tokens).await.unwrap();
    assert_eq!(server.requests()[0]["token"], "1//refresh");
}

#[tokio::test]
async fn test_refresh_through_manager_against_token_server() {
    let server = MockServer::default();
    server.reply(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"error": "backend_error"}),
    );
    server.reply(
        StatusCode::BAD_REQUEST,
        json!({"error": "invalid_grant", "error_description": "Bad Request"}),
    );
    let adapter = google(&server).await;
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(adapter));
    let manager = OAuthManager::new(SecureCredentialStore::in_memory(), registry);

    let stale = TokenSet::bearer("ya29.stale", Some("1//refresh".to_string()), Duration::seconds(30)).unwrap();
    manager.store().store_tokens(ProviderId::Google, &stale).await.unwrap();

    // 503: tokens survive.
    let err = manager.ensure_valid_tokens(ProviderId::Google).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        manager.get_tokens(ProviderId::Google).await.unwrap(),
        Some(stale)
    );

    // invalid_grant: tokens are purged.
    let err = manager.ensure_valid_tokens(ProviderId::Google).await.unwrap_err();
    assert!(matches!(err, AuthError::RefreshTokenExpired { .. }));
    assert!(manager.get_tokens(ProviderId::Google).await.unwrap().is_none());
}

#[tokio::test]
async fn test_openrouter_key_exchange() {
    let server = MockServer::default();
    server.reply(StatusCode::OK, json!({"key": "sk-or-v1-issued"}));
    let base = server.start().await;
    let adapter = OpenRouterAdapter::new(endpoint())
        .with_endpoints(format!("{}/auth", base), format!("{}/keys", base));

    let tokens = adapter
        .exchange_code_for_tokens("or-code", "or-verifier", "http://localhost:1/callback")
        .await
        .unwrap();
    assert_eq!(tokens.access_token(), "sk-or-v1-issued");
    assert!(tokens.refresh_token.is_none());
    assert!(!tokens.needs_refresh());
    assert!(adapter.validate_tokens(&tokens));

    let request = &server.requests()[0];
    assert_eq!(request["code"], "or-code");
    assert_eq!(request["code_verifier"], "or-verifier");
    assert_eq!(request["code_challenge_method"], "S256");
}
