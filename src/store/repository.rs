//! Collection repository: whole-document read and write of a collection.
//!
//! Every mutation round-trips the entire collection. There is no partial read or write.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ConcurrencyMode;
use crate::errors::AppError;
use crate::models::{CollectionKind, Record};
use crate::storage::{PutOptions, StorageBackend, WriteCondition};

/// Records read from the backend, with the entity tag they were read at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// `None` when the object did not exist or could not be read
    pub etag: Option<String>,
}

/// Reads and replaces collection documents on the storage backend.
#[derive(Clone)]
pub struct CollectionRepository {
    backend: Arc<dyn StorageBackend>,
    mode: ConcurrencyMode,
}

impl CollectionRepository {
    pub fn new(backend: Arc<dyn StorageBackend>, mode: ConcurrencyMode) -> Self {
        Self { backend, mode }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Current records of a collection.
    ///
    /// A missing object, a failed read and a malformed document all read as empty.
    pub async fn get(&self, kind: CollectionKind) -> Vec<Record> {
        self.load(kind).await.records
    }

    /// Like [`get`](Self::get), also returning the entity tag for a conditional save.
    pub async fn load(&self, kind: CollectionKind) -> Snapshot {
        let object = match self.backend.get(kind.key()).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                tracing::debug!("Collection {} not created yet", kind);
                return Snapshot::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read collection {}: {}", kind, e);
                return Snapshot::default();
            }
        };

        Snapshot {
            records: parse_document(kind, &object.body),
            etag: object.etag,
        }
    }

    /// Replace the whole collection unconditionally.
    pub async fn save(&self, kind: CollectionKind, records: &[Record]) -> Result<(), AppError> {
        self.write(kind, records, None).await
    }

    /// Replace the collection read as `snapshot`.
    ///
    /// In optimistic mode the write only lands if nobody wrote since the snapshot was read.
    pub async fn save_snapshot(
        &self,
        kind: CollectionKind,
        snapshot: &Snapshot,
    ) -> Result<(), AppError> {
        let condition = match self.mode {
            ConcurrencyMode::LastWriteWins => None,
            ConcurrencyMode::Optimistic => Some(match &snapshot.etag {
                Some(etag) => WriteCondition::IfMatch(etag.clone()),
                None => WriteCondition::IfAbsent,
            }),
        };
        self.write(kind, &snapshot.records, condition).await
    }

    async fn write(
        &self,
        kind: CollectionKind,
        records: &[Record],
        condition: Option<WriteCondition>,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(records)?;
        let options = PutOptions::json_document().with_condition(condition);

        let result = self.backend.put(kind.key(), body, &options).await?;
        tracing::info!(
            "Saved {} records to {} ({})",
            records.len(),
            kind,
            result.url
        );
        Ok(())
    }
}

/// Parse a collection document, keeping only JSON objects.
fn parse_document(kind: CollectionKind, body: &[u8]) -> Vec<Record> {
    let items = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            tracing::warn!("Collection {} is not a JSON array; treating as empty", kind);
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Collection {} is not valid JSON ({}); treating as empty", kind, e);
            return Vec::new();
        }
    };

    let total = items.len();
    let records: Vec<Record> = items.into_iter().filter_map(Record::from_value).collect();
    if records.len() != total {
        tracing::warn!(
            "Dropped {} non-object entries from collection {}",
            total - records.len(),
            kind
        );
    }
    records
}
