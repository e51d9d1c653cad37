//! OAuth token sets and token-endpoint response normalization.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Tokens within this many seconds of expiry are treated as needing refresh.
pub const REFRESH_BUFFER_SECS: i64 = 5 * 60;

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// Normalized token type for bearer credentials.
pub const BEARER: &str = "Bearer";

/// A set of OAuth tokens for one provider.
///
/// This is also the at-rest record format: one JSON object per provider with
/// camelCase keys and an ISO-8601 `expiresAt`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl TokenSet {
    /// Build a token set, rejecting an empty access token.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        token_type: &str,
        scope: Option<String>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(AuthError::InvalidTokens("access token is empty".to_string()));
        }
        Ok(Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            token_type: normalize_token_type(token_type),
            scope: scope.filter(|s| !s.is_empty()),
        })
    }

    /// Bearer token set expiring `lifetime` from now.
    pub fn bearer(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        lifetime: Duration,
    ) -> Result<Self> {
        Self::new(access_token, refresh_token, Utc::now() + lifetime, BEARER, None)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Validate a record read back from storage.
    pub fn check(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(AuthError::InvalidTokens("access token is empty".to_string()));
        }
        Ok(())
    }

    /// True once `expires_at` has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when the token expires within the refresh buffer (or already has).
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= refresh_buffer()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    /// Time left before expiry, floored at zero.
    pub fn time_until_expiration_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Carry the previous refresh token forward when a refresh response
    /// omitted a new one.
    pub fn inherit_refresh_token(mut self, previous: &TokenSet) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.scope.is_none() {
            self.scope = previous.scope.clone();
        }
        self
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// The refresh buffer as a duration.
pub fn refresh_buffer() -> Duration {
    Duration::seconds(REFRESH_BUFFER_SECS)
}

/// Collapse provider casing variants of "bearer".
pub fn normalize_token_type(token_type: &str) -> String {
    let trimmed = token_type.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(BEARER) {
        BEARER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Successful response from a standard OAuth token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Token lifetime in seconds (if provided).
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Turn a relative `expires_in` into an absolute token set.
    pub fn into_token_set(self, now: DateTime<Utc>) -> Result<TokenSet> {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS).max(0);
        TokenSet::new(
            self.access_token,
            self.refresh_token,
            now + Duration::seconds(lifetime),
            self.token_type.as_deref().unwrap_or(BEARER),
            self.scope,
        )
    }
}

/// Error response from a token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    pub fn describe(&self) -> String {
        match &self.error_description {
            Some(desc) if !desc.is_empty() => format!("{}: {}", self.error, desc),
            _ => self.error.clone(),
        }
    }
}

/// Render a secret for logs without revealing it.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}…({} chars)", prefix, secret.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let err = TokenSet::bearer("  ", None, Duration::hours(1)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidTokens(_)));
    }

    #[test]
    fn test_token_type_normalized() {
        for variant in ["bearer", "BEARER", "Bearer", " bearer "] {
            let tokens =
                TokenSet::new("t", None, Utc::now(), variant, None).unwrap();
            assert_eq!(tokens.token_type, "Bearer");
        }
        let mac = TokenSet::new("t", None, Utc::now(), "MAC", None).unwrap();
        assert_eq!(mac.token_type, "MAC");
    }

    #[test]
    fn test_needs_refresh_buffer() {
        let now = at("2025-01-03T12:00:00Z");
        let tokens = TokenSet::new("t", None, at("2025-01-03T12:01:00Z"), BEARER, None).unwrap();
        assert!(tokens.needs_refresh_at(now));
        assert!(!tokens.is_expired_at(now));

        let exactly_buffer =
            TokenSet::new("t", None, at("2025-01-03T12:05:00Z"), BEARER, None).unwrap();
        assert!(exactly_buffer.needs_refresh_at(now));

        let fresh = TokenSet::new("t", None, at("2025-01-03T13:00:00Z"), BEARER, None).unwrap();
        assert!(!fresh.needs_refresh_at(now));

        let expired = TokenSet::new("t", None, at("2025-01-03T11:00:00Z"), BEARER, None).unwrap();
        assert!(expired.needs_refresh_at(now));
        assert!(expired.is_expired_at(now));
    }

    #[test]
    fn test_time_until_expiration_floors_at_zero() {
        let now = at("2025-01-03T12:00:00Z");
        let expired = TokenSet::new("t", None, at("2025-01-03T11:00:00Z"), BEARER, None).unwrap();
        assert_eq!(expired.time_until_expiration_at(now), Duration::zero());

        let later = TokenSet::new("t", None, at("2025-01-03T12:10:00Z"), BEARER, None).unwrap();
        assert_eq!(later.time_until_expiration_at(now), Duration::minutes(10));
    }

    #[test]
    fn test_token_response_conversion() {
        let json = r#"{
            "access_token": "ya29.xxxx",
            "token_type": "bearer",
            "expires_in": 3599,
            "scope": "openid email"
        }"#;
        let now = at("2025-01-03T12:00:00Z");
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_token_set(now).unwrap();

        assert_eq!(tokens.access_token(), "ya29.xxxx");
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_at, now + Duration::seconds(3599));
        assert_eq!(tokens.refresh_token, None);
        assert_eq!(tokens.scope.as_deref(), Some("openid email"));
    }

    #[test]
    fn test_inherit_refresh_token() {
        let previous =
            TokenSet::bearer("old", Some("refresh-1".to_string()), Duration::hours(1)).unwrap();
        let refreshed = TokenSet::bearer("new", None, Duration::hours(1))
            .unwrap()
            .inherit_refresh_token(&previous);
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));

        let rotated = TokenSet::bearer("new", Some("refresh-2".to_string()), Duration::hours(1))
            .unwrap()
            .inherit_refresh_token(&previous);
        assert_eq!(rotated.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[test]
    fn test_record_format() {
        let tokens = TokenSet::new(
            "access",
            Some("refresh".to_string()),
            at("2025-01-03T12:00:00Z"),
            "bearer",
            None,
        )
        .unwrap();
        let json = serde_json::to_string(&tokens).unwrap();
        insta::assert_snapshot!(json, @r#"{"accessToken":"access","refreshToken":"refresh","expiresAt":"2025-01-03T12:00:00Z","tokenType":"Bearer","scope":null}"#);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let tokens = TokenSet::bearer(
            "ya29.SECRET-ACCESS",
            Some("1//SECRET-REFRESH".to_string()),
            Duration::hours(1),
        )
        .unwrap();
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("SECRET"));
        assert!(debug.contains("Bearer"));

        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "ya29.SECRET-ACCESS", "refresh_token": "1//SECRET-REFRESH"}"#,
        )
        .unwrap();
        assert!(!format!("{:?}", response).contains("SECRET"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("ya29.abcdefgh"), "ya29…(13 chars)");
    }
}
