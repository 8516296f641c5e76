//! Async key-value contract for secure, on-device storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt secure store: {0}")]
    Corrupt(String),

    #[error("Failed to decrypt stored value - wrong passphrase or tampered store")]
    Decrypt,

    #[error("Failed to encrypt value")]
    Encrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Encrypted platform key-value store. Keys and values are plain strings;
/// every operation may fail (device locked, no backend available, ...).
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Deleting a key that is not present succeeds.
    async fn delete_item(&self, key: &str) -> Result<(), StorageError>;

    /// Store `value`, or delete the key when `value` is `None`.
    async fn put_item(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        match value {
            Some(value) => self.set_item(key, value).await,
            None => self.delete_item(key).await,
        }
    }
}

/// In-process storage, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items()?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_item(&self, key: &str) -> Result<(), StorageError> {
        self.items()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_set_get_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("session").await.unwrap(), None);

        storage.set_item("session", "abc").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap().as_deref(), Some("abc"));

        storage.delete_item("session").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_item_none_deletes() {
        let storage = MemoryStorage::new();
        storage.put_item("session", Some("abc")).await.unwrap();
        storage.put_item("session", None).await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap(), None);

        // Deleting an absent key is not an error
        storage.put_item("session", None).await.unwrap();
    }
}
