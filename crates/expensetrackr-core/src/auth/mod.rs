//! Authentication module for persisting and observing the session token.
//!
//! This module provides:
//! - `SecureStorage`: async key-value contract over encrypted storage, with
//!   OS keychain, encrypted file and in-memory backends
//! - `SessionStore`: the single persisted session token as observable state
//!
//! Tokens have no expiry; they stay valid until signed out.

pub mod encrypted_file;
pub mod keychain;
pub mod session;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, StorageBackend, ENV_STORAGE_PASSPHRASE};

pub use encrypted_file::EncryptedFileStorage;
pub use keychain::KeyringStorage;
pub use session::{SessionSnapshot, SessionState, SessionStore};
pub use storage::{MemoryStorage, SecureStorage, StorageError};

/// Secure storage key the session token lives under
pub const SESSION_KEY: &str = "session";

/// Build the storage backend selected in `config`
pub async fn open_storage(config: &Config) -> Result<Arc<dyn SecureStorage>> {
    match config.storage {
        StorageBackend::Keyring => Ok(Arc::new(KeyringStorage::new())),
        StorageBackend::File => {
            let passphrase = config.storage_passphrase.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "{} must be set to use the file storage backend",
                    ENV_STORAGE_PASSPHRASE
                )
            })?;
            let path = Config::secure_store_path()?;
            let storage = EncryptedFileStorage::open(path, passphrase)
                .await
                .context("Failed to open encrypted secure store")?;
            Ok(Arc::new(storage))
        }
    }
}
