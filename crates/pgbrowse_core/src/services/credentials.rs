//! Secret storage for connection credentials and saved connections.
//!
//! Values are opaque strings kept by a [`CredentialsProvider`]:
//!
//! - **Debug builds**: JSON file at `~/.config/pgbrowse/dev_credentials.json`
//!   (set `PGBROWSE_USE_KEYCHAIN=1` to use the keychain instead)
//! - **Release builds**: OS keychain (macOS Keychain, Windows Credential
//!   Manager, Linux Secret Service)
//! - **Fallback**: in-memory, lost on exit
//!
//! [`ConnectionStore`] layers the remembered configuration and the saved
//! connection list on top of a provider. Missing or unreadable entries read as
//! empty; they are logged, never returned as errors.

use crate::error::{BrowseError, BrowseResult};
use crate::models::{DatabaseConfig, SavedConnection};

use chrono::Utc;
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Service name used for keychain entries.
const KEYRING_SERVICE: &str = "dev.pgbrowse.PgBrowse";

/// Environment variable that forces keychain usage in debug builds.
const FORCE_KEYCHAIN_ENV: &str = "PGBROWSE_USE_KEYCHAIN";

/// Key of the remembered connection configuration.
pub const CREDENTIALS_KEY: &str = "postgresql.credentials";

/// Key of the saved connection list.
pub const CONNECTIONS_KEY: &str = "postgresql.connections";

// ============================================================================
// Providers
// ============================================================================

/// A string key/value secret store.
pub trait CredentialsProvider: Send + Sync {
    /// Store a value.
    fn store(&self, key: &str, value: &str) -> BrowseResult<()>;

    /// Get a value.
    fn get(&self, key: &str) -> BrowseResult<Option<String>>;

    /// Delete a value. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> BrowseResult<()>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// File-based storage for development builds.
///
/// Unsigned development builds trigger a keychain prompt on every access,
/// so debug builds keep secrets in a JSON file readable only by the owner.
#[derive(Debug)]
pub struct FileCredentialsProvider {
    file_path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialsFile {
    credentials: HashMap<String, String>,
}

impl FileCredentialsProvider {
    /// Open `~/.config/pgbrowse/dev_credentials.json`.
    pub fn new() -> BrowseResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BrowseError::storage("Could not determine config directory", None))?
            .join("pgbrowse");

        fs::create_dir_all(&config_dir).map_err(|e| {
            BrowseError::storage(
                format!("Failed to create config directory: {e}"),
                Some("Check permissions for ~/.config/pgbrowse"),
            )
        })?;

        Self::with_path(config_dir.join("dev_credentials.json"))
    }

    /// Open a credentials file at a custom path.
    pub fn with_path(file_path: PathBuf) -> BrowseResult<Self> {
        let provider = Self { file_path, cache: RwLock::new(HashMap::new()) };
        provider.load_from_file()?;
        Ok(provider)
    }

    fn load_from_file(&self) -> BrowseResult<()> {
        if !self.file_path.exists() {
            return Ok(());
        }

        let contents = fs::read_to_string(&self.file_path).map_err(|e| {
            BrowseError::storage(format!("Failed to read credentials file: {e}"), None)
        })?;
        if contents.trim().is_empty() {
            return Ok(());
        }

        let file: CredentialsFile = serde_json::from_str(&contents).map_err(|e| {
            BrowseError::storage(
                format!("Invalid credentials file format: {e}"),
                Some("Delete the credentials file to start fresh"),
            )
        })?;

        *self.cache.write() = file.credentials;
        Ok(())
    }

    /// Write the cache to disk, owner read/write only on Unix.
    fn save_to_file(&self) -> BrowseResult<()> {
        let file = CredentialsFile { credentials: self.cache.read().clone() };
        let json = serde_json::to_string_pretty(&file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut handle = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.file_path)
                .map_err(|e| {
                    BrowseError::storage(format!("Failed to create credentials file: {e}"), None)
                })?;
            handle.write_all(json.as_bytes()).map_err(|e| {
                BrowseError::storage(format!("Failed to write credentials file: {e}"), None)
            })?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.file_path, json).map_err(|e| {
                BrowseError::storage(format!("Failed to write credentials file: {e}"), None)
            })?;
        }

        Ok(())
    }
}

impl CredentialsProvider for FileCredentialsProvider {
    fn store(&self, key: &str, value: &str) -> BrowseResult<()> {
        self.cache.write().insert(key.to_string(), value.to_string());
        self.save_to_file()?;
        tracing::debug!(key, "Credential stored in file");
        Ok(())
    }

    fn get(&self, key: &str) -> BrowseResult<Option<String>> {
        Ok(self.cache.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> BrowseResult<()> {
        if self.cache.write().remove(key).is_some() {
            self.save_to_file()?;
            tracing::debug!(key, "Credential deleted from file");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FileCredentialsProvider"
    }
}

/// OS keychain storage for release builds.
#[derive(Debug)]
pub struct KeychainCredentialsProvider {
    service: String,
}

impl Default for KeychainCredentialsProvider {
    fn default() -> Self {
        Self { service: KEYRING_SERVICE.to_string() }
    }
}

impl KeychainCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom keychain service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, key: &str) -> BrowseResult<Entry> {
        Entry::new(&self.service, key).map_err(|e| BrowseError::keyring(e.to_string(), None))
    }
}

impl CredentialsProvider for KeychainCredentialsProvider {
    fn store(&self, key: &str, value: &str) -> BrowseResult<()> {
        self.entry(key)?.set_password(value).map_err(|e| {
            BrowseError::keyring(e.to_string(), Some("Grant pgbrowse access in system preferences"))
        })?;
        tracing::debug!(key, "Credential stored in keychain");
        Ok(())
    }

    fn get(&self, key: &str) -> BrowseResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(BrowseError::keyring(
                e.to_string(),
                Some("Grant pgbrowse access in system preferences"),
            )),
        }
    }

    fn delete(&self, key: &str) -> BrowseResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(key, "Credential deleted from keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(BrowseError::keyring(e.to_string(), None)),
        }
    }

    fn name(&self) -> &'static str {
        "KeychainCredentialsProvider"
    }
}

/// In-memory storage. Values are lost when the process exits.
#[derive(Debug, Default)]
pub struct SessionCredentialsProvider {
    values: RwLock<HashMap<String, String>>,
}

impl SessionCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialsProvider for SessionCredentialsProvider {
    fn store(&self, key: &str, value: &str) -> BrowseResult<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> BrowseResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> BrowseResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SessionCredentialsProvider"
    }
}

/// Pick the provider for this build.
pub fn select_provider() -> Arc<dyn CredentialsProvider> {
    let force_keychain = std::env::var(FORCE_KEYCHAIN_ENV).map(|v| v == "1").unwrap_or(false);

    #[cfg(debug_assertions)]
    {
        if force_keychain {
            tracing::debug!(reason = "PGBROWSE_USE_KEYCHAIN=1", "Using keychain credential storage");
            return Arc::new(KeychainCredentialsProvider::new());
        }

        match FileCredentialsProvider::new() {
            Ok(provider) => {
                tracing::debug!(reason = "debug build", "Using file-based credential storage");
                Arc::new(provider)
            }
            Err(e) => {
                tracing::warn!(error = %e, "File credential storage unavailable, using session storage");
                Arc::new(SessionCredentialsProvider::new())
            }
        }
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = force_keychain;
        tracing::debug!(reason = "release build", "Using keychain credential storage");
        Arc::new(KeychainCredentialsProvider::new())
    }
}

// ============================================================================
// ConnectionStore
// ============================================================================

/// Remembered credentials and the saved connection list.
pub struct ConnectionStore {
    provider: Arc<dyn CredentialsProvider>,
}

impl ConnectionStore {
    pub fn new(provider: Arc<dyn CredentialsProvider>) -> Self {
        tracing::info!(provider = provider.name(), "Connection store initialized");
        Self { provider }
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.provider.get(key) {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read stored value");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring unreadable stored value");
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> BrowseResult<()> {
        self.provider.store(key, &serde_json::to_string(value)?)
    }

    /// The remembered configuration, if any.
    pub fn stored_credentials(&self) -> Option<DatabaseConfig> {
        self.read_json(CREDENTIALS_KEY)
    }

    /// Remember `config`, password included.
    pub fn save_credentials(&self, config: &DatabaseConfig) -> BrowseResult<()> {
        self.write_json(CREDENTIALS_KEY, config)?;
        tracing::debug!(host = %config.hostname, database = %config.database, "Credentials saved");
        Ok(())
    }

    /// Forget the remembered configuration.
    pub fn clear_credentials(&self) -> BrowseResult<()> {
        self.provider.delete(CREDENTIALS_KEY)
    }

    /// All saved connections, in insertion order.
    pub fn all_connections(&self) -> Vec<SavedConnection> {
        self.read_json(CONNECTIONS_KEY).unwrap_or_default()
    }

    /// Look up a saved connection by id.
    pub fn find_connection(&self, id: &str) -> Option<SavedConnection> {
        self.all_connections().into_iter().find(|c| c.id == id)
    }

    /// Save a new named connection.
    pub fn save_connection(
        &self,
        name: impl Into<String>,
        config: DatabaseConfig,
    ) -> BrowseResult<SavedConnection> {
        let mut connections = self.all_connections();
        let connection = SavedConnection::new(name, config);
        connections.push(connection.clone());
        self.write_json(CONNECTIONS_KEY, &connections)?;
        tracing::debug!(connection_id = %connection.id, "Connection saved");
        Ok(connection)
    }

    /// Rename or reconfigure a saved connection.
    ///
    /// Returns `None` when no connection has this id.
    pub fn update_connection(
        &self,
        id: &str,
        name: impl Into<String>,
        config: DatabaseConfig,
    ) -> BrowseResult<Option<SavedConnection>> {
        let mut connections = self.all_connections();
        let Some(existing) = connections.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        existing.name = name.into();
        existing.config = config;
        let updated = existing.clone();

        self.write_json(CONNECTIONS_KEY, &connections)?;
        tracing::debug!(connection_id = id, "Connection updated");
        Ok(Some(updated))
    }

    /// Remove a saved connection. Unknown ids are ignored.
    pub fn delete_connection(&self, id: &str) -> BrowseResult<()> {
        let mut connections = self.all_connections();
        connections.retain(|c| c.id != id);
        self.write_json(CONNECTIONS_KEY, &connections)?;
        tracing::debug!(connection_id = id, "Connection deleted");
        Ok(())
    }

    /// Stamp a saved connection as just used.
    pub fn update_last_used(&self, id: &str) -> BrowseResult<()> {
        let mut connections = self.all_connections();
        if let Some(connection) = connections.iter_mut().find(|c| c.id == id) {
            connection.last_used = Some(Utc::now());
            self.write_json(CONNECTIONS_KEY, &connections)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStore").field("provider", &self.provider.name()).finish()
    }
}
