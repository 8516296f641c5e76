//! Passphrase-encrypted file store for hosts without an OS keychain.
//!
//! The store is a single JSON document. Each value is sealed with
//! ChaCha20-Poly1305 under a key derived by Argon2 from the passphrase and a
//! per-file random salt. The entry name is bound in as associated data, so a
//! ciphertext copied under another key fails to open.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::storage::{SecureStorage, StorageError};

const STORE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    salt: String,
    #[serde(default)]
    entries: BTreeMap<String, SealedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    nonce: String,
    ciphertext: String,
    updated_at: DateTime<Utc>,
}

pub struct EncryptedFileStorage {
    path: PathBuf,
    salt: String,
    cipher: ChaCha20Poly1305,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl fmt::Debug for EncryptedFileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStorage {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// The passphrase is not checked here; a wrong one surfaces as
    /// [`StorageError::Decrypt`] on the first read of an existing entry.
    pub async fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        if passphrase.is_empty() {
            return Err(StorageError::KeyDerivation(
                "passphrase must not be empty".to_string(),
            ));
        }

        let path = path.into();
        let salt = match read_store(&path).await? {
            Some(store) => store.salt,
            None => {
                let mut salt = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                STANDARD.encode(salt)
            }
        };
        let salt_bytes = decode_field("salt", &salt)?;
        let cipher = derive_cipher(passphrase, &salt_bytes)?;

        debug!(path = %path.display(), "Opened encrypted secure store");
        Ok(Self {
            path,
            salt,
            cipher,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreFile, StorageError> {
        match read_store(&self.path).await? {
            Some(store) if store.salt != self.salt => Err(StorageError::Corrupt(
                "store was re-keyed by another process".to_string(),
            )),
            Some(store) => Ok(store),
            None => Ok(StoreFile {
                version: STORE_VERSION,
                salt: self.salt.clone(),
                entries: BTreeMap::new(),
            }),
        }
    }

    async fn save(&self, store: &StoreFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(store)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written store
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn seal(&self, key: &str, value: &str) -> Result<SealedEntry, StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Encrypt)?;

        Ok(SealedEntry {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
            updated_at: Utc::now(),
        })
    }

    fn unseal(&self, key: &str, entry: &SealedEntry) -> Result<String, StorageError> {
        let nonce = decode_field("nonce", &entry.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(StorageError::Corrupt(format!(
                "nonce for '{}' has length {}",
                key,
                nonce.len()
            )));
        }
        let ciphertext = decode_field("ciphertext", &entry.ciphertext)?;
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Decrypt)?;

        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Corrupt(format!("value for '{}' is not UTF-8", key)))
    }
}

#[async_trait]
impl SecureStorage for EncryptedFileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store
            .entries
            .get(key)
            .map(|entry| self.unseal(key, entry))
            .transpose()
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.load().await?;
        store.entries.insert(key.to_string(), self.seal(key, value)?);
        self.save(&store).await
    }

    async fn delete_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.load().await?;
        if store.entries.remove(key).is_some() {
            self.save(&store).await?;
        }
        Ok(())
    }
}

async fn read_store(path: &Path) -> Result<Option<StoreFile>, StorageError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let store: StoreFile =
        serde_json::from_str(&contents).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    if store.version != STORE_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported store version {}",
            store.version
        )));
    }
    Ok(Some(store))
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::KeyDerivation(e.to_string()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, StorageError> {
    STANDARD
        .decode(value)
        .map_err(|e| StorageError::Corrupt(format!("invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-store.json");

        let storage = EncryptedFileStorage::open(&path, "correct horse").await.unwrap();
        storage.set_item("session", "abc123").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap().as_deref(), Some("abc123"));

        let reopened = EncryptedFileStorage::open(&path, "correct horse").await.unwrap();
        assert_eq!(reopened.get_item("session").await.unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_value_is_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-store.json");

        let storage = EncryptedFileStorage::open(&path, "correct horse").await.unwrap();
        storage.set_item("session", "very-secret-token").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("very-secret-token"));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-store.json");

        let storage = EncryptedFileStorage::open(&path, "correct horse").await.unwrap();
        storage.set_item("session", "abc123").await.unwrap();

        let wrong = EncryptedFileStorage::open(&path, "battery staple").await.unwrap();
        let err = wrong.get_item("session").await.unwrap_err();
        assert!(matches!(err, StorageError::Decrypt));
    }

    #[tokio::test]
    async fn test_delete_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secure-store.json");

        let storage = EncryptedFileStorage::open(&path, "pw").await.unwrap();
        // Nothing written yet
        assert_eq!(storage.get_item("session").await.unwrap(), None);
        storage.delete_item("session").await.unwrap();
        assert!(!path.exists());

        storage.set_item("session", "abc").await.unwrap();
        storage.delete_item("session").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_passphrase_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = EncryptedFileStorage::open(dir.path().join("s.json"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyDerivation(_)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-store.json");
        std::fs::write(&path, "not json").unwrap();

        let err = EncryptedFileStorage::open(&path, "pw").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }
}
