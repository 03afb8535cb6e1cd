//! Object storage abstraction.
//!
//! Exactly one provider is active per process. Collections sit on top of this as
//! whole JSON documents under fixed keys.

mod blob;
mod memory;
mod r2;

pub use blob::BlobBackend;
pub use memory::MemoryBackend;
pub use r2::R2Backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConcurrencyMode, StorageConfig};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to the object store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transport or SDK failure
    #[error("{provider} storage error: {source}")]
    Provider {
        provider: &'static str,
        #[source]
        source: BoxError,
    },
    /// The provider answered with a non-success status
    #[error("{provider} rejected request for {key} with status {status}: {message}")]
    Rejected {
        provider: &'static str,
        key: String,
        status: u16,
        message: String,
    },
    /// A conditional write lost against another writer
    #[error("{provider} precondition failed for {key}")]
    PreconditionFailed { provider: &'static str, key: String },
    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: &'static str,
        capability: &'static str,
    },
}

impl StorageError {
    pub fn provider(&self) -> &'static str {
        match self {
            StorageError::Provider { provider, .. }
            | StorageError::Rejected { provider, .. }
            | StorageError::PreconditionFailed { provider, .. }
            | StorageError::Unsupported { provider, .. } => provider,
        }
    }

    pub(crate) fn provider_error(
        provider: &'static str,
        source: impl Into<BoxError>,
    ) -> StorageError {
        StorageError::Provider {
            provider,
            source: source.into(),
        }
    }
}

/// Visibility of a written object. Only public-read is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Public,
}

/// Options for [`StorageBackend::put`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub access: Access,
    pub content_type: String,
    /// Insert a random token before the key's extension
    pub add_random_suffix: bool,
    /// Replace an existing object under the same key
    pub allow_overwrite: bool,
    /// Write only if the stored object still matches this precondition
    pub condition: Option<WriteCondition>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            access: Access::Public,
            content_type: "application/octet-stream".to_string(),
            add_random_suffix: false,
            allow_overwrite: false,
            condition: None,
        }
    }
}

impl PutOptions {
    /// Options every collection save uses: public JSON, fixed key, overwrite.
    pub fn json_document() -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            allow_overwrite: true,
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: Option<WriteCondition>) -> Self {
        self.condition = condition;
        self
    }
}

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Precondition for a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// The stored object's entity tag must equal this value
    IfMatch(String),
    /// No object may exist under the key yet
    IfAbsent,
}

/// Result of a successful put.
#[derive(Debug, Clone, Serialize)]
pub struct PutResult {
    pub url: String,
    /// Key actually written (differs from the requested key with a random suffix)
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Options for [`StorageBackend::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

/// One object in a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    pub url: String,
    pub key: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entries: Vec<ObjectEntry>,
}

/// Body and entity tag of a stored object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

/// Uniform put/list/get over an object store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Provider name used in logs and errors.
    fn provider(&self) -> &'static str;

    /// Whether [`WriteCondition`] is honoured by `put`.
    fn supports_conditional_put(&self) -> bool;

    /// Write an object. Partial success is never reported as success.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<PutResult, StorageError>;

    /// List stored objects.
    async fn list(&self, options: &ListOptions) -> Result<ListResult, StorageError>;

    /// Uncached read of one object. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;
}

/// Build the backend selected by configuration.
pub fn build_backend(
    config: &StorageConfig,
    concurrency: ConcurrencyMode,
    timeout: Duration,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::R2(r2) => Arc::new(R2Backend::new(r2, timeout)),
        StorageConfig::Blob(blob) => Arc::new(BlobBackend::new(blob, timeout)?),
        StorageConfig::Memory => Arc::new(MemoryBackend::new()),
    };

    if concurrency == ConcurrencyMode::Optimistic && !backend.supports_conditional_put() {
        return Err(StorageError::Unsupported {
            provider: backend.provider(),
            capability: "conditional writes",
        });
    }

    Ok(backend)
}

/// Apply a random suffix before the extension, as `name-abcd1234.ext`.
pub(crate) fn suffixed_key(key: &str) -> String {
    let token: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    match key.rfind('.') {
        Some(dot) if dot > 0 && !key[dot..].contains('/') => {
            format!("{}-{}{}", &key[..dot], token, &key[dot..])
        }
        _ => format!("{}-{}", key, token),
    }
}

/// Join a public base URL and a key with exactly one slash.
pub(crate) fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
