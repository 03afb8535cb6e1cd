//! Configuration module for the collection store.
//!
//! All configuration is loaded from environment variables with sensible defaults.
//! The storage provider is chosen here, once, and handed to the storage layer as a value.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default bucket used by the R2 provider.
const DEFAULT_R2_BUCKET: &str = "static";
/// Default API endpoint of the hosted blob provider.
const DEFAULT_BLOB_API_URL: &str = "https://blob.vercel-storage.com";

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Credentials and endpoint for the Cloudflare R2 (S3-compatible) provider.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Public base URL objects are served from (used to build returned URLs)
    pub public_domain: String,
}

impl R2Config {
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// Credentials and endpoints for the hosted blob provider.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub token: String,
    /// Public base URL the store's objects are readable from. Unset means look each key up by listing
    pub public_url: Option<String>,
    pub api_url: String,
}

/// The storage provider active for this process.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    R2(R2Config),
    Blob(BlobConfig),
    /// In-process store, for development and tests
    Memory,
}

impl StorageConfig {
    /// Pick the provider from environment variables.
    ///
    /// R2 wins when its account and key are present, then the blob provider, then memory.
    pub fn from_env() -> Self {
        let r2_account = non_empty_var("R2_ACCOUNT_ID");
        let r2_key = non_empty_var("R2_ACCESS_KEY_ID");

        if let (Some(account_id), Some(access_key_id)) = (r2_account, r2_key) {
            return StorageConfig::R2(R2Config {
                account_id,
                access_key_id,
                secret_access_key: non_empty_var("R2_SECRET_ACCESS_KEY").unwrap_or_default(),
                bucket: non_empty_var("R2_BUCKET_NAME")
                    .unwrap_or_else(|| DEFAULT_R2_BUCKET.to_string()),
                public_domain: non_empty_var("R2_PUBLIC_DOMAIN").unwrap_or_default(),
            });
        }

        if let Some(token) = non_empty_var("BLOB_READ_WRITE_TOKEN") {
            return StorageConfig::Blob(BlobConfig {
                token,
                public_url: non_empty_var("BLOB_PUBLIC_URL"),
                api_url: non_empty_var("BLOB_API_URL")
                    .unwrap_or_else(|| DEFAULT_BLOB_API_URL.to_string()),
            });
        }

        StorageConfig::Memory
    }

    /// Name of the provider, as reported in errors and status output.
    pub fn provider_name(&self) -> &'static str {
        match self {
            StorageConfig::R2(_) => "r2",
            StorageConfig::Blob(_) => "blob",
            StorageConfig::Memory => "memory",
        }
    }

    pub fn is_r2_configured(&self) -> bool {
        matches!(self, StorageConfig::R2(_))
    }
}

/// How collection writes treat a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// Unconditional overwrite; a concurrent writer's change can be lost
    #[default]
    LastWriteWins,
    /// Conditional put against the entity tag seen at read time
    Optimistic,
}

impl FromStr for ConcurrencyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "lww" => Ok(ConcurrencyMode::LastWriteWins),
            "optimistic" => Ok(ConcurrencyMode::Optimistic),
            other => Err(ConfigError::Invalid {
                name: "STORE_CONCURRENCY",
                value: other.to_string(),
            }),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key guarding mutating routes (auth disabled when unset)
    pub api_psk: Option<String>,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Upper bound for a single backend round trip
    pub request_timeout: Duration,
    pub concurrency: ConcurrencyMode,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = non_empty_var("STORE_API_PSK");

        let bind_raw = env::var("STORE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "STORE_BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let log_level = env::var("STORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let timeout_raw = env::var("STORE_REQUEST_TIMEOUT_SECS").unwrap_or_else(|_| "15".to_string());
        let timeout_secs: u64 = timeout_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "STORE_REQUEST_TIMEOUT_SECS",
            value: timeout_raw.clone(),
        })?;

        let concurrency = match non_empty_var("STORE_CONCURRENCY") {
            Some(raw) => raw.parse()?,
            None => ConcurrencyMode::default(),
        };

        Ok(Self {
            api_psk,
            bind_addr,
            log_level,
            request_timeout: Duration::from_secs(timeout_secs),
            concurrency,
            storage: StorageConfig::from_env(),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
