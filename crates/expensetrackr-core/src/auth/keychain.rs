use async_trait::async_trait;
use keyring::Entry;

use super::storage::{SecureStorage, StorageError};

/// Keychain service name entries are filed under
pub const SERVICE_NAME: &str = "expensetrackr";

/// OS keychain-backed secure storage.
///
/// Keychain calls block (D-Bus, Security.framework, Credential Manager),
/// so each one runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StorageError> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key)?;
            op(entry)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStorage for KeyringStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| {
            entry.set_password(&value)?;
            Ok(())
        })
        .await
    }

    async fn delete_item(&self, key: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionStore;
    use std::sync::Arc;

    // These talk to the real OS keychain; run them with
    // `cargo test -- --ignored` from a desktop session.

    #[tokio::test]
    #[ignore = "needs an unlocked OS keychain"]
    async fn test_missing_entry_reads_as_none() {
        let storage = KeyringStorage::with_service("expensetrackr-test-missing");
        let value = storage.get_item("no-such-key").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    #[ignore = "needs an unlocked OS keychain"]
    async fn test_delete_missing_entry_succeeds() {
        let storage = KeyringStorage::with_service("expensetrackr-test-missing");
        storage.delete_item("no-such-key").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs an unlocked OS keychain"]
    async fn test_set_get_delete_round_trip() {
        let storage = KeyringStorage::with_service("expensetrackr-test-round-trip");

        storage.set_item("session", "abc123").await.unwrap();
        assert_eq!(
            storage.get_item("session").await.unwrap().as_deref(),
            Some("abc123")
        );

        // A second handle sees the same entry
        let other = KeyringStorage::with_service("expensetrackr-test-round-trip");
        assert_eq!(
            other.get_item("session").await.unwrap().as_deref(),
            Some("abc123")
        );

        storage.delete_item("session").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "needs an unlocked OS keychain"]
    async fn test_session_survives_reopen() {
        let service = "expensetrackr-test-session";
        let store =
            SessionStore::open(Arc::new(KeyringStorage::with_service(service)), "session").await;
        store.write(Some("abc123".to_string())).await;
        assert_eq!(store.read().await.as_deref(), Some("abc123"));

        let reopened =
            SessionStore::open(Arc::new(KeyringStorage::with_service(service)), "session").await;
        assert_eq!(reopened.state().token(), Some("abc123"));

        reopened.write(None).await;
        assert_eq!(reopened.read().await, None);
    }
}
