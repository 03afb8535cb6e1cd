//! In-process storage backend for development and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    public_url, suffixed_key, ListOptions, ListResult, ObjectEntry, PutOptions, PutResult,
    StorageBackend, StorageError, StoredObject, WriteCondition,
};

const PROVIDER: &str = "memory";
const BASE_URL: &str = "memory://store";

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    etag: String,
    modified_at: DateTime<Utc>,
}

/// Keeps objects in a map behind an async lock. Entity tags are a write counter.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, for exercising error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail with a transport-style error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Store raw bytes directly, bypassing options. Test seeding helper.
    pub async fn insert_raw(&self, key: &str, body: impl Into<Vec<u8>>) {
        let etag = self.next_etag();
        self.objects.write().await.insert(
            key.to_string(),
            MemoryObject {
                body: body.into(),
                etag,
                modified_at: Utc::now(),
            },
        );
    }

    fn next_etag(&self) -> String {
        format!("\"{}\"", self.writes.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn supports_conditional_put(&self) -> bool {
        true
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<PutResult, StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::provider_error(
                PROVIDER,
                "simulated write failure",
            ));
        }

        let key = if options.add_random_suffix {
            suffixed_key(key)
        } else {
            key.to_string()
        };

        let mut objects = self.objects.write().await;
        let existing = objects.get(&key);

        match (&options.condition, existing) {
            (Some(WriteCondition::IfMatch(expected)), Some(current)) if &current.etag == expected => {}
            (Some(WriteCondition::IfAbsent), None) => {}
            (Some(_), _) => {
                return Err(StorageError::PreconditionFailed {
                    provider: PROVIDER,
                    key,
                })
            }
            (None, Some(_)) if !options.allow_overwrite => {
                return Err(StorageError::Rejected {
                    provider: PROVIDER,
                    key,
                    status: 409,
                    message: "object already exists".to_string(),
                })
            }
            (None, _) => {}
        }

        let etag = self.next_etag();
        objects.insert(
            key.clone(),
            MemoryObject {
                body,
                etag: etag.clone(),
                modified_at: Utc::now(),
            },
        );

        Ok(PutResult {
            url: public_url(BASE_URL, &key),
            key,
            etag: Some(etag),
        })
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, StorageError> {
        let objects = self.objects.read().await;
        let prefix = options.prefix.as_deref().unwrap_or("");
        let limit = options.limit.unwrap_or(usize::MAX);

        let entries = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, object)| ObjectEntry {
                url: public_url(BASE_URL, key),
                key: key.clone(),
                modified_at: object.modified_at,
            })
            .collect();

        Ok(ListResult { entries })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::provider_error(
                PROVIDER,
                "simulated read failure",
            ));
        }

        Ok(self.objects.read().await.get(key).map(|object| StoredObject {
            body: object.body.clone(),
            etag: Some(object.etag.clone()),
        }))
    }
}
