use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::providers::{GoogleAdapter, OpenRouterAdapter, UnsupportedAdapter};
use crate::auth::{
    AdapterRegistry, AuthConfig, AuthMethod, CredentialBackend, FileBackend, KeyringBackend,
    MemoryBackend, OAuthSettings, SecureCredentialStore, TokenEndpoint,
};
use crate::provider::ProviderId;

/// Where OAuth tokens are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OS credential vault (Keychain, Secret Service, Credential Manager).
    #[default]
    Keyring,
    /// JSON file readable only by the current user.
    File,
    /// Process memory; nothing survives exit.
    Memory,
}

/// Global authentication settings (`[auth]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Credential storage backend
    pub backend: BackendKind,
    /// Path for the file backend (defaults to the user data directory)
    pub credentials_path: Option<PathBuf>,
    /// Seconds to wait for the browser redirect
    pub callback_timeout_secs: u64,
    /// Timeout for token endpoint requests, in seconds
    pub http_timeout_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Keyring,
            credentials_path: None,
            callback_timeout_secs: 300,
            http_timeout_secs: 30,
        }
    }
}

/// Per-provider settings (`[providers.<id>]`).
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Method tried first: "oauth" or "api_key"
    pub preferred_method: AuthMethod,
    /// Whether OAuth may be used at all
    pub oauth_enabled: bool,
    /// API key (can also be set via the provider's environment variable)
    pub api_key: Option<String>,
    /// Try the other method when the preferred one fails
    pub enable_fallback: bool,
    /// OAuth client ID, for providers that need one
    pub client_id: Option<String>,
    /// OAuth client secret (Google installed-app clients)
    pub client_secret: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("preferred_method", &self.preferred_method)
            .field("oauth_enabled", &self.oauth_enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("enable_fallback", &self.enable_fallback)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            preferred_method: AuthMethod::ApiKey,
            oauth_enabled: false,
            api_key: None,
            enable_fallback: false,
            client_id: None,
            client_secret: None,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub auth: AuthSettings,
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
}

impl Config {
    /// Returns the default config file path: ~/.config/scry-cli/auth.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scry-cli").join("auth.toml"))
    }

    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from_path(&path).ok())
            .unwrap_or_default()
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::default_path() {
            self.save_to_path(&path)
        } else {
            Err(anyhow::anyhow!("Could not determine config directory"))
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolved [`AuthConfig`] for `provider`.
    ///
    /// A missing API key is filled from the provider's environment variable.
    /// Returns `None` when the provider has neither a config section nor a key
    /// in the environment.
    pub fn auth_config(&self, provider: ProviderId) -> Option<AuthConfig> {
        let env_key = std::env::var(provider.env_var_name())
            .ok()
            .filter(|key| !key.trim().is_empty());
        self.auth_config_with_env(provider, env_key)
    }

    fn auth_config_with_env(&self, provider: ProviderId, env_key: Option<String>) -> Option<AuthConfig> {
        let section = self.providers.get(&provider);
        if section.is_none() && env_key.is_none() {
            return None;
        }
        let section = section.cloned().unwrap_or_default();
        let api_key = section
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or(env_key);

        Some(AuthConfig {
            preferred_method: section.preferred_method,
            oauth_enabled: section.oauth_enabled,
            api_key,
            enable_fallback: section.enable_fallback,
        })
    }

    /// Every provider with a resolvable [`AuthConfig`].
    pub fn auth_configs(&self) -> Vec<(ProviderId, AuthConfig)> {
        ProviderId::all()
            .iter()
            .filter_map(|provider| self.auth_config(*provider).map(|config| (*provider, config)))
            .collect()
    }

    /// Build the configured credential store.
    pub fn credential_store(&self) -> anyhow::Result<SecureCredentialStore> {
        let backend: Arc<dyn CredentialBackend> = match self.auth.backend {
            BackendKind::Keyring => Arc::new(KeyringBackend::new()),
            BackendKind::Memory => Arc::new(MemoryBackend::default()),
            BackendKind::File => {
                let path = self
                    .auth
                    .credentials_path
                    .clone()
                    .or_else(FileBackend::default_path)
                    .ok_or_else(|| anyhow::anyhow!("Could not determine credentials file path"))?;
                Arc::new(FileBackend::new(path))
            }
        };
        Ok(SecureCredentialStore::new(backend))
    }

    /// Build the adapter registry. Providers without OAuth get the
    /// unsupported adapter so lookups never come back empty.
    pub fn adapter_registry(&self) -> AdapterRegistry {
        let endpoint = TokenEndpoint::new(Duration::from_secs(self.auth.http_timeout_secs));
        let section = |provider| self.providers.get(&provider).cloned().unwrap_or_default();

        let google = section(ProviderId::Google);
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(GoogleAdapter::new(
            google.client_id.unwrap_or_default(),
            google.client_secret,
            endpoint.clone(),
        )));
        registry.register(Arc::new(OpenRouterAdapter::new(endpoint)));
        registry.register(Arc::new(UnsupportedAdapter::new(ProviderId::Anthropic)));
        registry.register(Arc::new(UnsupportedAdapter::new(ProviderId::OpenAi)));
        registry
    }

    pub fn oauth_settings(&self) -> OAuthSettings {
        OAuthSettings {
            callback_timeout: Duration::from_secs(self.auth.callback_timeout_secs),
        }
    }
}
