//! Local HTTP endpoint that receives the OAuth redirect.
//!
//! The listener binds `127.0.0.1:0`, keeps the socket it bound, and resolves
//! exactly one outcome: the first request to the callback path wins, later
//! requests only get a page telling the user the flow already finished.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Scry CLI</title></head>
<body>
    <h1>Authentication complete</h1>
    <p>You can close this window and return to the terminal.</p>
    <script>window.close();</script>
</body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Scry CLI - Error</title></head>
<body>
    <h1>Authentication failed</h1>
    <p>Check the terminal for details.</p>
</body>
</html>"#;

const ALREADY_DONE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Scry CLI</title></head>
<body>
    <h1>This login attempt has already finished</h1>
</body>
</html>"#;

/// Authorization code and echoed state from the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Starts callback endpoints.
#[async_trait]
pub trait CallbackListener: Send + Sync {
    /// Bind a fresh endpoint serving `callback_path`.
    async fn start(&self, callback_path: &str) -> Result<Box<dyn PendingCallback>>;
}

/// A running callback endpoint.
#[async_trait]
pub trait PendingCallback: Send {
    fn port(&self) -> u16;

    /// Wait for the redirect, at most `timeout`.
    async fn wait(&mut self, timeout: Duration) -> Result<CallbackParams>;

    /// Shut the endpoint down. Safe to call more than once.
    fn stop(&mut self);
}

/// Axum-backed listener on the loopback interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCallbackListener;

type Outcome = Result<CallbackParams>;

#[derive(Clone)]
struct CallbackState {
    tx: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    /// Deliver the outcome if nothing has been delivered yet.
    fn deliver(&self, outcome: Outcome) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Interpret the redirect query string.
fn parse_callback(params: &HashMap<String, String>) -> Outcome {
    let non_empty = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();

    if let Some(error) = non_empty("error") {
        let detail = match non_empty("error_description") {
            Some(desc) => format!("{}: {}", error, desc),
            None => error,
        };
        return Err(AuthError::AuthorizationDenied(detail));
    }

    match (non_empty("code"), non_empty("state")) {
        (Some(code), Some(state)) => Ok(CallbackParams { code, state }),
        (None, _) => Err(AuthError::MalformedCallback("missing code parameter".to_string())),
        (_, None) => Err(AuthError::MalformedCallback("missing state parameter".to_string())),
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = parse_callback(&params);
    let succeeded = outcome.is_ok();
    if let Err(e) = &outcome {
        warn!(error = %e, "OAuth callback reported an error");
    }

    if !state.deliver(outcome) {
        debug!("Ignoring repeated OAuth callback");
        return (StatusCode::OK, Html(ALREADY_DONE_PAGE));
    }

    if succeeded {
        (StatusCode::OK, Html(SUCCESS_PAGE))
    } else {
        (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
    }
}

#[async_trait]
impl CallbackListener for LocalCallbackListener {
    async fn start(&self, callback_path: &str) -> Result<Box<dyn PendingCallback>> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(|e| AuthError::Listener(format!("Failed to bind callback port: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Listener(e.to_string()))?
            .port();

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route(callback_path, get(handle_callback))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .with_state(CallbackState {
                tx: Arc::new(Mutex::new(Some(result_tx))),
            });

        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "Callback server exited with an error");
            }
        });

        debug!(port, "Callback listener started");
        Ok(Box::new(LocalPendingCallback {
            port,
            result_rx: Some(result_rx),
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        }))
    }
}

struct LocalPendingCallback {
    port: u16,
    result_rx: Option<oneshot::Receiver<Outcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

#[async_trait]
impl PendingCallback for LocalPendingCallback {
    fn port(&self) -> u16 {
        self.port
    }

    async fn wait(&mut self, timeout: Duration) -> Result<CallbackParams> {
        let Some(rx) = self.result_rx.take() else {
            return Err(AuthError::Listener("callback already consumed".to_string()));
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AuthError::Listener("callback server stopped".to_string())),
            Err(_) => Err(AuthError::CallbackTimeout(timeout)),
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            debug!(port = self.port, "Callback listener stopped");
        }
        // Let the graceful shutdown finish on its own; just detach.
        self.server.take();
    }
}

impl Drop for LocalPendingCallback {
    fn drop(&mut self) {
        self.stop();
    }
}
