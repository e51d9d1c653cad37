//! Error types for authentication operations.
//!
//! Every failure carries an [`ErrorKind`] so callers can decide whether to
//! retry, re-authenticate, or fix their configuration without inspecting
//! message text.

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderId;

/// Result type for authentication operations.
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing adapter, provider not configured, OAuth unsupported, no API key.
    Configuration,
    /// State mismatch or malformed callback. Nothing was stored.
    Csrf,
    /// Network failure, 5xx, timeout. Stored tokens are untouched.
    Transient,
    /// Refresh token expired or revoked. Stored tokens were purged.
    Terminal,
    /// Preferred method failed and fallback is disabled.
    Policy,
}

/// Error codes and phrasings that mean the refresh token itself is dead.
const TERMINAL_VOCABULARY: &[&str] = &[
    "invalid_grant",
    "refresh_token_expired",
    "token_expired",
    "invalid_token",
    "token has been expired or revoked",
    "refresh token is invalid",
    "refresh token expired",
    "refresh token has expired",
];

/// Classify a failure by its OAuth error code and message.
///
/// Used for adapters that do not tag their errors. Anything that does not
/// match the terminal vocabulary is transient.
pub fn classify_message(code: Option<&str>, message: &str) -> ErrorKind {
    let haystacks = [code.unwrap_or_default(), message];
    let terminal = haystacks.iter().any(|text| {
        let lower = text.to_ascii_lowercase();
        TERMINAL_VOCABULARY.iter().any(|needle| lower.contains(needle))
    });
    if terminal {
        ErrorKind::Terminal
    } else {
        ErrorKind::Transient
    }
}

/// A failure reported by a provider adapter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AdapterError {
    /// Classification set at the point of origin, if known.
    pub kind: Option<ErrorKind>,
    /// OAuth `error` code from the token endpoint, if any.
    pub code: Option<String>,
    /// HTTP status, if the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl AdapterError {
    /// An error with no classification; [`AdapterError::kind`] falls back to
    /// message matching.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::unclassified(message).with_kind(ErrorKind::Transient)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::unclassified(message).with_kind(ErrorKind::Terminal)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::unclassified(message).with_kind(ErrorKind::Configuration)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Effective classification: the structured kind if set, otherwise the
    /// vocabulary-based fallback.
    pub fn kind(&self) -> ErrorKind {
        self.kind
            .unwrap_or_else(|| classify_message(self.code.as_deref(), &self.message))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else if err.is_connect() {
            format!("Connection failed: {}", err)
        } else {
            format!("Network error: {}", err)
        };
        let mut out = AdapterError::transient(message);
        if let Some(status) = err.status() {
            out = out.with_status(status.as_u16());
        }
        out
    }
}

/// Errors returned by the authentication core.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {0} is not configured for authentication")]
    NotConfigured(ProviderId),

    #[error("No OAuth adapter registered for {0}")]
    AdapterNotRegistered(ProviderId),

    #[error("OAuth is not yet supported for {0}; use an API key instead")]
    OAuthUnsupported(ProviderId),

    #[error("OAuth client ID is not configured for {0}")]
    MissingClientId(ProviderId),

    #[error("No API key configured for {0}")]
    MissingApiKey(ProviderId),

    #[error("No OAuth tokens stored for {0}; authenticate first")]
    NoTokens(ProviderId),

    #[error("No refresh token available for {0}; please re-authenticate")]
    NoRefreshToken(ProviderId),

    #[error("An authorization flow for {0} is already in progress")]
    FlowInProgress(ProviderId),

    #[error("OAuth state mismatch; possible CSRF attack")]
    StateMismatch,

    #[error("Malformed OAuth callback: {0}")]
    MalformedCallback(String),

    #[error("Authorization was denied: {0}")]
    AuthorizationDenied(String),

    #[error("Timed out after {0:?} waiting for the OAuth callback")]
    CallbackTimeout(Duration),

    #[error("Callback listener failed: {0}")]
    Listener(String),

    #[error("Provider returned an invalid token set: {0}")]
    InvalidTokens(String),

    #[error("Refresh token for {provider} is expired or revoked; please re-authenticate ({reason})")]
    RefreshTokenExpired { provider: ProviderId, reason: String },

    #[error("{provider} request failed: {source}")]
    Adapter {
        provider: ProviderId,
        #[source]
        source: AdapterError,
    },

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Policy(String),
}

impl AuthError {
    pub fn adapter(provider: ProviderId, source: AdapterError) -> Self {
        Self::Adapter { provider, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProvider(_)
            | Self::NotConfigured(_)
            | Self::AdapterNotRegistered(_)
            | Self::OAuthUnsupported(_)
            | Self::MissingClientId(_)
            | Self::MissingApiKey(_)
            | Self::NoTokens(_)
            | Self::NoRefreshToken(_)
            | Self::FlowInProgress(_) => ErrorKind::Configuration,
            Self::StateMismatch | Self::MalformedCallback(_) => ErrorKind::Csrf,
            Self::AuthorizationDenied(_)
            | Self::CallbackTimeout(_)
            | Self::Listener(_)
            | Self::InvalidTokens(_)
            | Self::Storage(_) => ErrorKind::Transient,
            Self::RefreshTokenExpired { .. } => ErrorKind::Terminal,
            Self::Adapter { source, .. } => source.kind(),
            Self::Policy(_) => ErrorKind::Policy,
        }
    }

    /// Whether retrying later, without user action, may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether the user has to log in again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::NoTokens(_) | Self::NoRefreshToken(_) | Self::RefreshTokenExpired { .. }
        ) || self.kind() == ErrorKind::Terminal
    }
}
