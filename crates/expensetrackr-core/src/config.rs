//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API base URL, an optional fixed device name, which secure storage
//! backend holds the session token, and the request timeout.
//!
//! Configuration is stored at `~/.config/expensetrackr/config.json` and can
//! be overridden with `EXPENSETRACKR_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ApiConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::device;

/// Application name used for config/data directory paths
const APP_NAME: &str = "expensetrackr";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted store file name (file storage backend)
const SECURE_STORE_FILE: &str = "secure-store.json";

pub const DEFAULT_API_URL: &str = "https://api.expensetrackr.app";

pub const ENV_API_URL: &str = "EXPENSETRACKR_API_URL";
pub const ENV_DEVICE_NAME: &str = "EXPENSETRACKR_DEVICE_NAME";
pub const ENV_STORAGE: &str = "EXPENSETRACKR_STORAGE";
pub const ENV_STORAGE_PASSPHRASE: &str = "EXPENSETRACKR_STORAGE_PASSPHRASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file in the data directory
    File,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            other => bail!("Unknown storage backend '{}' (expected 'keyring' or 'file')", other),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Keyring => write!(f, "keyring"),
            StorageBackend::File => write!(f, "file"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub device_name: Option<String>,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
    /// Only ever read from the environment, never written to disk
    #[serde(skip)]
    pub storage_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            device_name: None,
            storage: StorageBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage_passphrase: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("device_name", &self.device_name)
            .field("storage", &self.storage)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "storage_passphrase",
                &self.storage_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Config {
    /// Load the config file, apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `EXPENSETRACKR_*` overrides; `lookup` returns a variable's value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url.trim().to_string();
        }
        if let Some(name) = lookup(ENV_DEVICE_NAME) {
            self.device_name = Some(name);
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage
                .parse()
                .with_context(|| format!("Invalid {}", ENV_STORAGE))?;
        }
        if let Some(passphrase) = lookup(ENV_STORAGE_PASSPHRASE) {
            self.storage_passphrase = Some(passphrase);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            bail!("API URL is required but not configured");
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            bail!("API URL must start with http:// or https://: {}", self.api_url);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Connection settings for the API client, with the device name resolved
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(
            self.api_url.clone(),
            device::device_name(self.device_name.as_deref()),
        )
        .with_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn secure_store_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SECURE_STORE_FILE))
    }
}
