//! Provider identifiers.
//!
//! The set of providers is closed: every provider the CLI can talk to has a
//! variant here, and adapters are keyed by it rather than by free-form strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    Google,
    OpenAi,
    OpenRouter,
}

impl ProviderId {
    /// Returns all providers in display order.
    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::Anthropic,
            ProviderId::Google,
            ProviderId::OpenAi,
            ProviderId::OpenRouter,
        ]
    }

    /// Stable lowercase identifier used in config files and the vault.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
            ProviderId::OpenAi => "openai",
            ProviderId::OpenRouter => "openrouter",
        }
    }

    /// Get the display name for this provider.
    pub const fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "Anthropic",
            ProviderId::Google => "Google",
            ProviderId::OpenAi => "OpenAI",
            ProviderId::OpenRouter => "OpenRouter",
        }
    }

    /// Get the environment variable name for the API key.
    pub const fn env_var_name(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "ANTHROPIC_API_KEY",
            ProviderId::Google => "GOOGLE_API_KEY",
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Account name under which this provider's tokens live in the vault.
    pub fn vault_account(&self) -> String {
        format!("oauth-tokens:{}", self.as_str())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProviderId::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AuthError::UnknownProvider(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("google".parse::<ProviderId>().unwrap(), ProviderId::Google);
        assert_eq!("OpenRouter".parse::<ProviderId>().unwrap(), ProviderId::OpenRouter);
        assert_eq!(" OPENAI ".parse::<ProviderId>().unwrap(), ProviderId::OpenAi);
    }

    #[test]
    fn test_parse_unknown_provider() {
        let err = "mistral".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, AuthError::UnknownProvider(ref p) if p == "mistral"));
    }

    #[test]
    fn test_display_matches_serde() {
        for provider in ProviderId::all() {
            let json = serde_json::to_string(provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider));
        }
    }

    #[test]
    fn test_vault_account() {
        assert_eq!(ProviderId::Google.vault_account(), "oauth-tokens:google");
    }
}
