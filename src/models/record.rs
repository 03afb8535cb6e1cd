//! Record model and the generic in-memory record operations.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// One entity in a collection: a JSON object with a string `id`.
///
/// Fields other than `id`, `createdAt` and `updatedAt` are opaque to the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any JSON object; anything else is not a record.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Boolean field, absent or non-boolean reads as false.
    pub fn flag(&self, field: &str) -> bool {
        self.0.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Shallow merge: top-level fields of `patch` replace ours.
    pub fn merge(&mut self, patch: Record) {
        self.0.extend(patch.0);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Fresh opaque identifier for a new record.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn find_index(records: &[Record], id: &str) -> Option<usize> {
    records.iter().position(|r| r.id() == Some(id))
}

/// Drop every record with this id. Returns whether anything was removed.
pub fn remove_by_id(records: &mut Vec<Record>, id: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.id() != Some(id));
    records.len() != before
}

/// Give a new record its id (when missing) and both timestamps.
pub fn stamp_new(record: &mut Record, now: &str) {
    if record.id().map_or(true, str::is_empty) {
        record.set(ID, generate_id());
    }
    record.set(CREATED_AT, now);
    record.set(UPDATED_AT, now);
}

/// Merge a patch into an existing record. `id` and `createdAt` are not patchable.
pub fn apply_patch(record: &mut Record, mut patch: Record, now: &str) {
    patch.remove(ID);
    patch.remove(CREATED_AT);
    record.merge(patch);
    record.set(UPDATED_AT, now);
}

/// Where new records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Prepend,
    Append,
}

/// Insert at the head or tail, returning the new index.
pub fn insert(records: &mut Vec<Record>, record: Record, placement: Placement) -> usize {
    match placement {
        Placement::Prepend => {
            records.insert(0, record);
            0
        }
        Placement::Append => {
            records.push(record);
            records.len() - 1
        }
    }
}

/// Outcome of [`upsert_by_predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub index: usize,
    pub created: bool,
}

/// Patch the first record matching `predicate`, or insert the patch as a new record.
pub fn upsert_by_predicate<P>(
    records: &mut Vec<Record>,
    predicate: P,
    patch: Record,
    placement: Placement,
    now: &str,
) -> Upserted
where
    P: Fn(&Record) -> bool,
{
    match records.iter().position(predicate) {
        Some(index) => {
            apply_patch(&mut records[index], patch, now);
            Upserted {
                index,
                created: false,
            }
        }
        None => {
            let mut record = patch;
            stamp_new(&mut record, now);
            let index = insert(records, record, placement);
            Upserted {
                index,
                created: true,
            }
        }
    }
}
