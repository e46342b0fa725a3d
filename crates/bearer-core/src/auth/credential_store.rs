use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::{AuthError, TokenPair};

/// Entry name under which the access token is persisted.
pub const ACCESS_TOKEN_ENTRY: &str = "auth.token";
/// Entry name under which the refresh token is persisted.
pub const REFRESH_TOKEN_ENTRY: &str = "auth.refreshToken";

/// Options applied when persisting an entry.
#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub max_age: Duration,
    pub path: String,
}

impl Default for PersistOptions {
    /// 30-day expiry, root path.
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60 * 24 * 30),
            path: "/".to_owned(),
        }
    }
}

/// Persistence abstraction for the credential pair.
///
/// `get` returns `None` unless both tokens are present and unexpired, so a
/// half-written store reads back as absent credentials.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<TokenPair>, AuthError>;
    fn set(&self, entry: &str, value: &str, options: &PersistOptions) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    path: String,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(value: &str, options: &PersistOptions) -> Self {
        let expires_at = chrono::Duration::from_std(options.max_age)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            value: value.to_owned(),
            path: options.path.clone(),
            expires_at,
        }
    }

    fn live_value(&self, now: DateTime<Utc>) -> Option<&str> {
        (now < self.expires_at).then_some(self.value.as_str())
    }
}

fn pair_from_entries(entries: &BTreeMap<String, StoredEntry>) -> Option<TokenPair> {
    let now = Utc::now();
    let access = entries.get(ACCESS_TOKEN_ENTRY)?.live_value(now)?;
    let refresh = entries.get(REFRESH_TOKEN_ENTRY)?.live_value(now)?;
    Some(TokenPair::new(access, refresh))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

/// Filesystem-backed credential storage under the user configuration
/// directory.
#[derive(Debug)]
pub struct FileCredentialStore {
    locator: ConfigLocator,
}

impl FileCredentialStore {
    pub fn new(locator: ConfigLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, AuthError> {
        Ok(Self::new(ConfigLocator::new()?))
    }

    /// Remove the persisted credentials entirely. Intended for teardown
    /// implementations; absence is not an error.
    pub fn delete(&self) -> Result<(), AuthError> {
        match fs::remove_file(self.locator.credentials_file()) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self) -> Result<CredentialsFile, AuthError> {
        let path = self.locator.credentials_file();
        if !path.exists() {
            return Ok(CredentialsFile {
                version: 1,
                entries: BTreeMap::new(),
            });
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>, AuthError> {
        let file = self.read()?;
        Ok(pair_from_entries(&file.entries))
    }

    fn set(&self, entry: &str, value: &str, options: &PersistOptions) -> Result<(), AuthError> {
        let mut file = self.read()?;
        file.entries
            .insert(entry.to_owned(), StoredEntry::new(value, options));
        let payload = serde_json::to_string_pretty(&file)?;
        Self::write_file(&self.locator.credentials_file(), &payload)
    }
}

/// In-process credential storage for server-rendered, per-request contexts
/// and tests. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    entries: Arc<Mutex<BTreeMap<String, StoredEntry>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with the given pair under the default options.
    pub fn with_tokens(pair: &TokenPair) -> Self {
        let store = Self::new();
        let options = PersistOptions::default();
        let mut entries = store.entries.lock().expect("credential store poisoned");
        entries.insert(
            ACCESS_TOKEN_ENTRY.to_owned(),
            StoredEntry::new(&pair.access_token, &options),
        );
        entries.insert(
            REFRESH_TOKEN_ENTRY.to_owned(),
            StoredEntry::new(&pair.refresh_token, &options),
        );
        drop(entries);
        store
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("credential store poisoned")
            .clear();
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<TokenPair>, AuthError> {
        let entries = self.entries.lock().expect("credential store poisoned");
        Ok(pair_from_entries(&entries))
    }

    fn set(&self, entry: &str, value: &str, options: &PersistOptions) -> Result<(), AuthError> {
        self.entries
            .lock()
            .expect("credential store poisoned")
            .insert(entry.to_owned(), StoredEntry::new(value, options));
        Ok(())
    }
}
