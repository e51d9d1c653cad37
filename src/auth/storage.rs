//! Secure storage for OAuth token sets.
//!
//! [`SecureCredentialStore`] owns the record format and the self-healing read
//! path; where the bytes live is decided by a [`CredentialBackend`]:
//!
//! - [`KeyringBackend`]: the OS credential vault (Keychain, Credential
//!   Manager, kernel keyutils).
//! - [`FileBackend`]: `~/.local/share/scry-cli/credentials.json`, mode 0600.
//! - [`MemoryBackend`]: process-local, nothing persisted.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::token::TokenSet;
use crate::error::{AuthError, Result};
use crate::provider::ProviderId;

/// Service namespace for vault entries.
pub const KEYRING_SERVICE: &str = "scry-cli";

/// Raw record storage keyed by account name.
///
/// Writes replace the whole record for an account.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn read(&self, account: &str) -> Result<Option<String>>;

    async fn write(&self, account: &str, record: &str) -> Result<()>;

    /// Delete a record. Returns whether one existed.
    async fn delete(&self, account: &str) -> Result<bool>;
}

/// Token store shared by the OAuth manager and the status/logout commands.
#[derive(Clone)]
pub struct SecureCredentialStore {
    backend: Arc<dyn CredentialBackend>,
}

impl SecureCredentialStore {
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Persist tokens for a provider, replacing any previous record.
    pub async fn store_tokens(&self, provider: ProviderId, tokens: &TokenSet) -> Result<()> {
        tokens.check()?;
        let record = serde_json::to_string(tokens)
            .map_err(|e| AuthError::Storage(format!("Failed to encode tokens: {}", e)))?;
        self.backend.write(&provider.vault_account(), &record).await?;
        debug!(%provider, backend = self.backend.name(), "Stored OAuth tokens");
        Ok(())
    }

    /// Load tokens for a provider.
    ///
    /// A record that fails to parse is deleted and reported as absent.
    pub async fn get_tokens(&self, provider: ProviderId) -> Result<Option<TokenSet>> {
        let account = provider.vault_account();
        let Some(record) = self.backend.read(&account).await? else {
            return Ok(None);
        };

        let parsed = serde_json::from_str::<TokenSet>(&record)
            .map_err(|e| e.to_string())
            .and_then(|tokens| tokens.check().map(|_| tokens).map_err(|e| e.to_string()));

        match parsed {
            Ok(tokens) => Ok(Some(tokens)),
            Err(reason) => {
                warn!(%provider, %reason, "Discarding corrupted token record");
                if let Err(e) = self.backend.delete(&account).await {
                    warn!(%provider, error = %e, "Failed to delete corrupted token record");
                }
                Ok(None)
            }
        }
    }

    /// Remove a provider's tokens. Returns whether any existed.
    pub async fn clear_tokens(&self, provider: ProviderId) -> Result<bool> {
        let removed = self.backend.delete(&provider.vault_account()).await?;
        debug!(%provider, removed, "Cleared OAuth tokens");
        Ok(removed)
    }

    /// Tokens exist and are outside the refresh buffer.
    pub async fn is_token_valid(&self, provider: ProviderId) -> Result<bool> {
        Ok(self
            .get_tokens(provider)
            .await?
            .is_some_and(|tokens| !tokens.needs_refresh_at(Utc::now())))
    }

    /// Providers that currently have a readable token record.
    pub async fn list_stored_providers(&self) -> Result<Vec<ProviderId>> {
        let mut stored = Vec::new();
        for provider in ProviderId::all() {
            if self.get_tokens(*provider).await?.is_some() {
                stored.push(*provider);
            }
        }
        Ok(stored)
    }

    /// Remove every provider's tokens. Returns the providers that had any.
    pub async fn clear_all(&self) -> Result<Vec<ProviderId>> {
        let mut cleared = Vec::new();
        for provider in ProviderId::all() {
            if self.clear_tokens(*provider).await? {
                cleared.push(*provider);
            }
        }
        Ok(cleared)
    }
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, account: &str) -> Result<Option<String>> {
        Ok(self.records().get(account).cloned())
    }

    async fn write(&self, account: &str, record: &str) -> Result<()> {
        self.records().insert(account.to_string(), record.to_string());
        Ok(())
    }

    async fn delete(&self, account: &str) -> Result<bool> {
        Ok(self.records().remove(account).is_some())
    }
}

/// OS credential vault backend.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn with_entry<T, F>(&self, account: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(keyring_error)?;
            op(entry).map_err(keyring_error)
        })
        .await
        .map_err(|e| AuthError::Storage(format!("Keyring task failed: {}", e)))?
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(err: keyring::Error) -> AuthError {
    match err {
        keyring::Error::NoStorageAccess(_) => {
            AuthError::Storage("Cannot access keyring storage".to_string())
        }
        keyring::Error::PlatformFailure(_) => {
            AuthError::Storage("Platform-specific keyring failure".to_string())
        }
        other => AuthError::Storage(other.to_string()),
    }
}

#[async_trait]
impl CredentialBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    async fn read(&self, account: &str) -> Result<Option<String>> {
        self.with_entry(account, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            // Undecodable bytes are a corrupted record; let the store heal it.
            Err(keyring::Error::BadEncoding(_)) => Ok(Some(String::new())),
            Err(e) => Err(e),
        })
        .await
    }

    async fn write(&self, account: &str, record: &str) -> Result<()> {
        let record = record.to_string();
        self.with_entry(account, move |entry| entry.set_password(&record))
            .await
    }

    async fn delete(&self, account: &str) -> Result<bool> {
        self.with_entry(account, |entry| match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e),
        })
        .await
    }
}

/// JSON file backend.
///
/// The file holds one document mapping account name to record. A document
/// that cannot be parsed is treated as empty and overwritten on next write.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the default storage path.
    ///
    /// Returns `~/.local/share/scry-cli/credentials.json` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("scry-cli").join("credentials.json"))
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_document(&path))
            .await
            .map_err(|e| AuthError::Storage(format!("Storage task failed: {}", e)))?
    }

    async fn save(&self, document: HashMap<String, String>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_document(&path, &document))
            .await
            .map_err(|e| AuthError::Storage(format!("Storage task failed: {}", e)))?
    }
}

fn load_document(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).map_err(|e| {
        AuthError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);

    match serde_json::from_reader(reader) {
        Ok(document) => Ok(document),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Credentials file is unreadable, treating as empty");
            Ok(HashMap::new())
        }
    }
}

/// Write the document to a sibling temp file, then rename over the target.
fn save_document(path: &Path, document: &HashMap<String, String>) -> Result<()> {
    let io_err =
        |what: &str, e: std::io::Error| AuthError::Storage(format!("{} {}: {}", what, path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("Failed to create directory for", e))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path).map_err(|e| io_err("Failed to create", e))?;

    // Set permissions to 0600 (owner read/write only) on Unix
    #[cfg(unix)]
    {
        let mut perms = file
            .metadata()
            .map_err(|e| io_err("Failed to stat", e))?
            .permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)
            .map_err(|e| io_err("Failed to set permissions on", e))?;
    }

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)
        .map_err(|e| AuthError::Storage(format!("Failed to encode credentials: {}", e)))?;
    writer.flush().map_err(|e| io_err("Failed to write", e))?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| io_err("Failed to replace", e))
}

#[async_trait]
impl CredentialBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn read(&self, account: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(account))
    }

    async fn write(&self, account: &str, record: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        document.insert(account.to_string(), record.to_string());
        self.save(document).await
    }

    async fn delete(&self, account: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        let existed = document.remove(account).is_some();
        if existed {
            self.save(document).await?;
        }
        Ok(existed)
    }
}
