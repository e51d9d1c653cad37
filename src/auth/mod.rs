//! Authentication core: credential storage, OAuth flows, and the policy that
//! picks between OAuth tokens and API keys.
//!
//! Layers, bottom up:
//! - [`SecureCredentialStore`] persists one token record per provider.
//! - [`ProviderAdapter`] implementations know each provider's endpoints.
//! - [`OAuthManager`] drives authorization, refresh, and revocation.
//! - [`AuthenticationManager`] decides which credential a caller gets.

mod adapter;
mod authenticator;
mod browser;
mod callback;
mod flow;
mod manager;
mod pkce;
pub mod providers;
mod single_flight;
mod storage;
mod token;

pub use adapter::{error_from_response, AdapterRegistry, AdapterResult, OAuthConfig, ProviderAdapter, TokenEndpoint};
pub use authenticator::{AuthConfig, AuthMethod, AuthResult, AuthStatus, AuthenticationManager};
pub use browser::{BrowserOpener, SystemBrowser};
pub use callback::{CallbackListener, CallbackParams, LocalCallbackListener, PendingCallback};
pub use flow::{FlowSlot, FlowState};
pub use manager::{OAuthManager, OAuthSettings, OAuthStatus, DEFAULT_CALLBACK_TIMEOUT};
pub use pkce::{compute_challenge, constant_time_eq, generate_state, Pkce, CHALLENGE_METHOD};
pub use single_flight::SingleFlight;
pub use storage::{CredentialBackend, FileBackend, KeyringBackend, MemoryBackend, SecureCredentialStore, KEYRING_SERVICE};
pub use token::{redact, refresh_buffer, TokenErrorResponse, TokenResponse, TokenSet, BEARER, REFRESH_BUFFER_SECS};
