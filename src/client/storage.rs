//! Encrypted session storage for the client.
//!
//! Values are serialized to JSON, encrypted with [`Crypto`] and kept as the
//! serialized [`EncryptedBlob`]. A blob that no longer decrypts (tampered,
//! or written under another key) is dropped and reads as absent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::{self, Crypto, CryptoError, EncryptedBlob};
use crate::token::CredentialPair;
use crate::types::UserDto;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const CSRF_TOKEN_KEY: &str = "csrfToken";
pub const USER_KEY: &str = "user";

/// Ephemeral key-value storage scoped to one session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

#[derive(Clone)]
pub struct SecureStorage {
    store: Arc<dyn SessionStore>,
    crypto: Arc<Crypto>,
}

impl SecureStorage {
    pub fn new(store: Arc<dyn SessionStore>, crypto: Arc<Crypto>) -> Self {
        Self { store, crypto }
    }

    /// In-memory storage under a fresh random key.
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()), Arc::new(Crypto::ephemeral()))
    }

    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CryptoError> {
        let plaintext = serde_json::to_string(value)?;
        let blob = self.crypto.encrypt(&plaintext)?;
        self.store.set(key, serde_json::to_string(&blob)?);
        Ok(())
    }

    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        let decoded = serde_json::from_str::<EncryptedBlob>(&raw)
            .map_err(CryptoError::from)
            .and_then(|blob| self.crypto.decrypt(&blob))
            .and_then(|plaintext| serde_json::from_str::<T>(&plaintext).map_err(CryptoError::from));
        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "dropping unreadable session entry");
                self.store.remove(key);
                None
            }
        }
    }

    pub fn remove_item(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn access_token(&self) -> Option<String> {
        self.get_item(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get_item(REFRESH_TOKEN_KEY)
    }

    pub fn set_credentials(&self, pair: &CredentialPair) -> Result<(), CryptoError> {
        self.set_item(ACCESS_TOKEN_KEY, &pair.access_token)?;
        self.set_item(REFRESH_TOKEN_KEY, &pair.refresh_token)
    }

    pub fn user(&self) -> Option<UserDto> {
        self.get_item(USER_KEY)
    }

    pub fn set_user(&self, user: &UserDto) -> Result<(), CryptoError> {
        self.set_item(USER_KEY, user)
    }

    /// The session's CSRF token, generated on first use and then reused.
    pub fn csrf_token(&self) -> Result<String, CryptoError> {
        if let Some(token) = self.get_item::<String>(CSRF_TOKEN_KEY) {
            return Ok(token);
        }
        let token = crypto::generate_token(32);
        self.set_item(CSRF_TOKEN_KEY, &token)?;
        Ok(token)
    }

    /// Drops tokens and the cached user. The CSRF token belongs to the
    /// session, not the credentials, and survives.
    pub fn clear_credentials(&self) {
        self.store.remove(ACCESS_TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
        self.store.remove(USER_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_stored_encrypted() {
        let store = Arc::new(MemorySessionStore::new());
        let storage = SecureStorage::new(store.clone(), Arc::new(Crypto::ephemeral()));

        storage.set_item("k", "top secret").unwrap();
        let raw = store.get("k").unwrap();
        assert!(!raw.contains("top secret"));
        assert_eq!(storage.get_item::<String>("k").as_deref(), Some("top secret"));
    }

    #[test]
    fn test_unreadable_entries_read_as_absent_and_are_dropped() {
        let store = Arc::new(MemorySessionStore::new());
        let storage = SecureStorage::new(store.clone(), Arc::new(Crypto::ephemeral()));

        store.set("garbage", "not a blob".to_string());
        assert_eq!(storage.get_item::<String>("garbage"), None);
        assert_eq!(store.get("garbage"), None);

        // Written under another key
        let other = SecureStorage::new(store.clone(), Arc::new(Crypto::ephemeral()));
        other.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item::<String>("k"), None);
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_csrf_token_is_stable_per_session() {
        let storage = SecureStorage::ephemeral();
        let first = storage.csrf_token().unwrap();
        assert_eq!(storage.csrf_token().unwrap(), first);

        storage.set_credentials(&CredentialPair { access_token: "a".into(), refresh_token: "r".into() }).unwrap();
        storage.clear_credentials();
        assert_eq!(storage.access_token(), None);
        assert_eq!(storage.refresh_token(), None);
        assert_eq!(storage.csrf_token().unwrap(), first);

        storage.clear();
        assert_ne!(storage.csrf_token().unwrap(), first);
    }
}
