//! Cache Store: the local mirror of remote records.
//!
//! Records are keyed by `(resource, external_id)`. Upserts are idempotent,
//! keep the original `local_id`, and are last-write-wins by `synced_at`: a
//! write carrying an older `synced_at` than the stored row is ignored.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::models::{MappedRecord, Resource, SyncCursor};
use crate::core::range::SyncRange;
use crate::error::Result;

/// A record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCachedRecord {
    pub resource: Resource,
    pub external_id: String,
    pub status: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Mapped fields.
    pub payload: Value,
    /// The remote payload as received.
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

impl NewCachedRecord {
    /// Build a write from a mapped record and the raw payload it came from.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HubError::Json`] if the mapped record cannot
    /// be serialized.
    pub fn from_mapped(record: &MappedRecord, raw: Value, synced_at: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            resource: record.resource(),
            external_id: record.external_id().to_string(),
            status: record.status(),
            occurred_at: record.occurred_at(),
            payload: record.to_payload()?,
            raw,
            synced_at,
        })
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    /// Assigned on first insert, never changed afterwards.
    pub local_id: i64,
    pub resource: Resource,
    pub external_id: String,
    pub status: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payload: Value,
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

/// Filter for [`CacheStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub resource: Resource,
    /// Only records whose `occurred_at` falls inside the range.
    pub range: Option<SyncRange>,
    pub status: Option<String>,
}

impl RecordFilter {
    #[must_use]
    pub const fn resource(resource: Resource) -> Self {
        Self {
            resource,
            range: None,
            status: None,
        }
    }

    #[must_use]
    pub const fn in_range(mut self, range: SyncRange) -> Self {
        self.range = Some(range);
        self
    }

    fn matches(&self, record: &CachedRecord) -> bool {
        record.resource == self.resource
            && self
                .range
                .is_none_or(|range| record.occurred_at.is_some_and(|at| range.contains(at)))
            && self
                .status
                .as_ref()
                .is_none_or(|status| record.status.as_ref() == Some(status))
    }
}

/// Persisted sync progress for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub key: String,
    /// Where to resume; `None` once the scope completed.
    pub cursor: Option<SyncCursor>,
    pub last_run_at: DateTime<Utc>,
    /// Counters of the last run, as JSON.
    pub last_stats: Option<Value>,
}

/// Storage seam for mirrored records and sync watermarks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or update by `(resource, external_id)` and return the stored row.
    async fn upsert(&self, record: NewCachedRecord) -> Result<CachedRecord>;

    async fn get(&self, resource: Resource, external_id: &str) -> Result<Option<CachedRecord>>;

    /// Matching records ordered by `occurred_at`, then `external_id`.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CachedRecord>>;

    async fn load_watermark(&self, key: &str) -> Result<Option<Watermark>>;

    async fn save_watermark(&self, watermark: &Watermark) -> Result<()>;

    async fn clear_watermark(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    next_local_id: i64,
    records: HashMap<(Resource, String), CachedRecord>,
    watermarks: HashMap<String, Watermark>,
}

/// In-process [`CacheStore`], used by tests and `--cache memory`.
#[derive(Default)]
pub struct MemoryCacheStore {
    state: Mutex<MemoryState>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn upsert(&self, record: NewCachedRecord) -> Result<CachedRecord> {
        let mut state = self.lock();
        let key = (record.resource, record.external_id.clone());
        if let Some(existing) = state.records.get_mut(&key) {
            if record.synced_at >= existing.synced_at {
                existing.status = record.status;
                existing.occurred_at = record.occurred_at;
                existing.payload = record.payload;
                existing.raw = record.raw;
                existing.synced_at = record.synced_at;
            }
            return Ok(existing.clone());
        }

        state.next_local_id += 1;
        let stored = CachedRecord {
            local_id: state.next_local_id,
            resource: record.resource,
            external_id: record.external_id,
            status: record.status,
            occurred_at: record.occurred_at,
            payload: record.payload,
            raw: record.raw,
            synced_at: record.synced_at,
        };
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, resource: Resource, external_id: &str) -> Result<Option<CachedRecord>> {
        Ok(self
            .lock()
            .records
            .get(&(resource, external_id.to_string()))
            .cloned())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CachedRecord>> {
        let mut rows: Vec<CachedRecord> = self
            .lock()
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(rows)
    }

    async fn load_watermark(&self, key: &str) -> Result<Option<Watermark>> {
        Ok(self.lock().watermarks.get(key).cloned())
    }

    async fn save_watermark(&self, watermark: &Watermark) -> Result<()> {
        self.lock()
            .watermarks
            .insert(watermark.key.clone(), watermark.clone());
        Ok(())
    }

    async fn clear_watermark(&self, key: &str) -> Result<()> {
        self.lock().watermarks.remove(key);
        Ok(())
    }
}
