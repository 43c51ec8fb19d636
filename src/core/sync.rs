//! Sync Engine: pages remote records into the cache.
//!
//! One [`SyncEngine::run_sync`] call walks `Idle -> Fetching -> Mapping ->
//! Writing -> Fetching ... -> Done` over every requested resource. Pages are
//! processed strictly in ascending order and sales are split into bounded
//! date windows processed oldest first. A record that fails to map or write is
//! recorded in [`SyncResult::failed`] and the run moves on; a page that cannot
//! be fetched aborts the run.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::core::api::{DEFAULT_PAGE_SIZE, PageCursor, RecordSource};
use crate::core::clock::Clock;
use crate::core::mapping::{external_id_of, map_record};
use crate::core::models::{MappedRecord, Resource, SyncCursor, SyncFailure, SyncResult};
use crate::core::range::{MAX_WINDOW_DAYS, SyncRange};
use crate::error::{HubError, Result};
use crate::storage::cache::{CacheStore, NewCachedRecord, Watermark};

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: u32,
    pub max_window_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_window_days: MAX_WINDOW_DAYS,
        }
    }
}

/// Parameters of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub range: SyncRange,
    /// Empty means [`Resource::DEFAULT_SYNC`].
    pub resources: Vec<Resource>,
    /// Continue from the stored watermark for this run key.
    pub resume: bool,
    /// Explicit start position; wins over `resume`.
    pub resume_from: Option<SyncCursor>,
    /// Stop cleanly between pages once exceeded.
    pub budget: Option<Duration>,
    /// Store a watermark after every committed page.
    pub persist_watermark: bool,
}

impl SyncRequest {
    #[must_use]
    pub const fn new(range: SyncRange) -> Self {
        Self {
            range,
            resources: Vec::new(),
            resume: false,
            resume_from: None,
            budget: None,
            persist_watermark: false,
        }
    }

    #[must_use]
    pub fn with_resources(mut self, resources: impl Into<Vec<Resource>>) -> Self {
        self.resources = resources.into();
        self
    }
}

/// Where a run currently is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching { resource: Resource, window: usize, page: u32 },
    Mapping { resource: Resource, page: u32, records: usize },
    Writing { resource: Resource, page: u32 },
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Fetching { resource, window, page } => {
                write!(f, "fetching {resource} window {window} page {page}")
            }
            Self::Mapping { resource, page, records } => {
                write!(f, "mapping {records} {resource} from page {page}")
            }
            Self::Writing { resource, page } => write!(f, "writing {resource} page {page}"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Outcome of [`SyncEngine::resync_records`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncResult {
    pub resource: Resource,
    pub requested: usize,
    pub upserted: usize,
    pub derived_upserted: usize,
    pub failed: Vec<SyncFailure>,
}

/// Mirrors remote records into a [`CacheStore`].
pub struct SyncEngine {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            settings,
        }
    }

    /// Watermark key of a run: its range and resource set.
    #[must_use]
    pub fn watermark_key(range: &SyncRange, resources: &[Resource]) -> String {
        let names: Vec<&str> = resources.iter().map(Resource::as_str).collect();
        format!("sync:{}:{}", range.key(), names.join(","))
    }

    /// Run one sync over `request.range`.
    ///
    /// # Errors
    ///
    /// Returns the fetch-level error (auth, remote, network) that stopped the
    /// run. Pages committed before it stay in the cache.
    pub async fn run_sync(&self, request: &SyncRequest) -> Result<SyncResult> {
        let resources = normalize_resources(&request.resources)?;
        let key = Self::watermark_key(&request.range, &resources);

        let resumed_from = match request.resume_from {
            Some(cursor) => Some(cursor),
            None if request.resume => self
                .store
                .load_watermark(&key)
                .await?
                .and_then(|mark| mark.cursor),
            None => None,
        }
        .filter(|cursor| resources.contains(&cursor.resource));

        let mut result = SyncResult::new(request.range, resources.clone());
        result.resumed_from = resumed_from;
        let started = Instant::now();
        trace_phase(SyncPhase::Idle);
        tracing::info!(
            range = %request.range,
            resources = ?resources,
            resumed_from = ?resumed_from,
            "Sync started"
        );

        for &resource in &resources {
            if resumed_from.is_some_and(|c| resource < c.resource) {
                continue;
            }
            let windows = self.windows_for(resource, &request.range);

            for (window, window_range) in windows.into_iter().enumerate() {
                let start_page = match resumed_from {
                    Some(c) if c.resource == resource && window < c.window => continue,
                    Some(c) if c.resource == resource && window == c.window => c.page,
                    _ => 1,
                };
                let mut cursor = PageCursor::new(
                    self.source.clone(),
                    resource,
                    self.settings.page_size,
                    window_range,
                )
                .starting_at(start_page);

                while let Some(page_number) = cursor.position() {
                    if let Some(budget) = request.budget
                        && result.pages_fetched > 0
                        && started.elapsed() >= budget
                    {
                        let next = SyncCursor {
                            resource,
                            window,
                            page: page_number,
                        };
                        result.next_cursor = Some(next);
                        if request.persist_watermark {
                            self.save_watermark(&key, Some(next), &result).await?;
                        }
                        tracing::info!(
                            next = ?next,
                            upserted = result.upserted,
                            "Sync budget exhausted, stopping early"
                        );
                        return Ok(result);
                    }

                    trace_phase(SyncPhase::Fetching {
                        resource,
                        window,
                        page: page_number,
                    });
                    let Some(page) = cursor.next_page().await? else {
                        break;
                    };
                    result.pages_fetched += 1;
                    result.fetched += page.items.len();

                    trace_phase(SyncPhase::Mapping {
                        resource,
                        page: page.number,
                        records: page.items.len(),
                    });
                    trace_phase(SyncPhase::Writing {
                        resource,
                        page: page.number,
                    });
                    for raw in &page.items {
                        self.write_item(resource, raw, &mut result).await;
                    }

                    if request.persist_watermark {
                        let next = cursor.position().map_or(
                            SyncCursor {
                                resource,
                                window: window + 1,
                                page: 1,
                            },
                            |page| SyncCursor {
                                resource,
                                window,
                                page,
                            },
                        );
                        self.save_watermark(&key, Some(next), &result).await?;
                    }
                }
            }
        }

        result.done = true;
        if request.persist_watermark {
            self.save_watermark(&key, None, &result).await?;
        }
        trace_phase(SyncPhase::Done);
        tracing::info!(
            fetched = result.fetched,
            upserted = result.upserted,
            derived = result.derived_upserted,
            failed = result.failed.len(),
            pages = result.pages_fetched,
            "Sync finished"
        );
        Ok(result)
    }

    /// Fetch, map and upsert specific records by id.
    ///
    /// A record the remote no longer has, answers with a non-auth error for,
    /// or that fails to map or write, is a per-record failure.
    ///
    /// # Errors
    ///
    /// Auth, network and timeout failures abort the whole call.
    pub async fn resync_records(&self, resource: Resource, ids: &[String]) -> Result<ResyncResult> {
        let mut outcome = ResyncResult {
            resource,
            requested: ids.len(),
            upserted: 0,
            derived_upserted: 0,
            failed: Vec::new(),
        };
        let fail = |id: &str, reason: String| SyncFailure {
            resource,
            external_id: id.to_string(),
            reason,
        };

        for id in ids {
            let raw = match self.source.fetch_record(resource, id).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    outcome.failed.push(fail(id, "not found on remote".to_string()));
                    continue;
                }
                Err(e @ HubError::RemoteApi { .. }) => {
                    outcome.failed.push(fail(id, e.to_string()));
                    continue;
                }
                Err(e) => return Err(e),
            };
            match self.write_one(resource, &raw).await {
                Ok(derived) => {
                    outcome.upserted += 1;
                    outcome.derived_upserted += derived;
                }
                Err(e) => {
                    tracing::warn!(%resource, external_id = %id, error = %e, "Resync failed");
                    outcome.failed.push(fail(id, e.to_string()));
                }
            }
        }

        tracing::info!(
            %resource,
            requested = outcome.requested,
            upserted = outcome.upserted,
            failed = outcome.failed.len(),
            "Resync finished"
        );
        Ok(outcome)
    }

    fn windows_for(&self, resource: Resource, range: &SyncRange) -> Vec<Option<SyncRange>> {
        if resource.is_range_scoped() {
            range
                .windows(self.settings.max_window_days)
                .into_iter()
                .map(Some)
                .collect()
        } else {
            vec![None]
        }
    }

    async fn write_item(&self, resource: Resource, raw: &Value, result: &mut SyncResult) {
        match self.write_one(resource, raw).await {
            Ok(derived) => {
                result.upserted += 1;
                result.derived_upserted += derived;
            }
            Err(e) => {
                let external_id = external_id_of(raw).unwrap_or_else(|| "<unknown>".to_string());
                tracing::warn!(%resource, %external_id, error = %e, "Record skipped");
                result.failed.push(SyncFailure {
                    resource,
                    external_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Map and upsert one payload. Returns the number of derived records written.
    async fn write_one(&self, resource: Resource, raw: &Value) -> Result<usize> {
        let mapped = map_record(resource, raw)?;
        let synced_at = self.clock.now();

        let mut derived = 0;
        for record in &mapped.derived {
            match self.upsert_derived(record, raw, synced_at).await {
                Ok(()) => derived += 1,
                Err(e) => tracing::warn!(
                    resource = %record.resource(),
                    external_id = record.external_id(),
                    error = %e,
                    "Derived record skipped"
                ),
            }
        }

        let write = NewCachedRecord::from_mapped(&mapped.record, raw.clone(), synced_at)?;
        let stored = self.store.upsert(write).await.map_err(|e| match e {
            e @ HubError::CacheWrite { .. } => e,
            other => HubError::CacheWrite {
                external_id: mapped.record.external_id().to_string(),
                reason: other.to_string(),
            },
        })?;
        tracing::debug!(
            %resource,
            external_id = %stored.external_id,
            local_id = stored.local_id,
            "Record upserted"
        );
        Ok(derived)
    }

    async fn upsert_derived(
        &self,
        record: &MappedRecord,
        parent: &Value,
        synced_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let raw = ["customer", "buyer"]
            .iter()
            .find_map(|key| parent.get(*key).filter(|v| v.is_object()))
            .cloned()
            .map_or_else(|| record.to_payload(), Ok)?;
        self.store
            .upsert(NewCachedRecord::from_mapped(record, raw, synced_at)?)
            .await?;
        Ok(())
    }

    async fn save_watermark(
        &self,
        key: &str,
        cursor: Option<SyncCursor>,
        result: &SyncResult,
    ) -> Result<()> {
        let watermark = Watermark {
            key: key.to_string(),
            cursor,
            last_run_at: self.clock.now(),
            last_stats: Some(json!({
                "fetched": result.fetched,
                "upserted": result.upserted,
                "failed": result.failed.len(),
                "pagesFetched": result.pages_fetched,
            })),
        };
        self.store.save_watermark(&watermark).await
    }
}

fn trace_phase(phase: SyncPhase) {
    tracing::debug!(%phase, "Sync phase");
}

fn normalize_resources(requested: &[Resource]) -> Result<Vec<Resource>> {
    let mut resources: Vec<Resource> = if requested.is_empty() {
        Resource::DEFAULT_SYNC.to_vec()
    } else {
        requested.iter().copied().filter(Resource::is_listable).collect()
    };
    resources.sort_unstable();
    resources.dedup();
    if resources.is_empty() {
        return Err(HubError::Config(
            "no syncable resources requested; customers are synced through sales".to_string(),
        ));
    }
    Ok(resources)
}
