//! Backfill Doctor: drift detection between the remote and the cache.
//!
//! The doctor only reads. Remediation is the caller's job, typically
//! [`crate::core::sync::SyncEngine::resync_records`] over
//! [`DoctorReport::flagged_ids`].

mod diff;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub use diff::FieldMismatch;

use crate::core::api::{DEFAULT_PAGE_SIZE, PageCursor, RecordSource};
use crate::core::mapping::{external_id_of, map_record};
use crate::core::models::{Resource, SyncFailure};
use crate::core::range::{MAX_WINDOW_DAYS, SyncRange};
use crate::error::{HubError, Result};
use crate::storage::cache::{CacheStore, RecordFilter};

/// What to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoctorRequest {
    pub range: SyncRange,
    pub resource: Resource,
}

impl DoctorRequest {
    /// Check sales over `range`.
    #[must_use]
    pub const fn new(range: SyncRange) -> Self {
        Self {
            range,
            resource: Resource::Sales,
        }
    }
}

/// Differences found for one resource over one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub checked_range: SyncRange,
    pub resource: Resource,
    pub remote_count: usize,
    pub cached_count: usize,
    /// Remote ids with no cached row.
    pub missing_in_cache: BTreeSet<String>,
    /// One entry per differing field of records present on both sides.
    pub mismatched: Vec<FieldMismatch>,
    /// Cached ids the remote no longer lists for the range.
    pub extra_in_cache: BTreeSet<String>,
    /// Remote records that could not be mapped, so could not be compared.
    pub unmapped_remote: Vec<SyncFailure>,
}

impl DoctorReport {
    /// No missing, mismatched, extra or unmapped records.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_in_cache.is_empty()
            && self.mismatched.is_empty()
            && self.extra_in_cache.is_empty()
            && self.unmapped_remote.is_empty()
    }

    /// Ids worth re-syncing: missing plus mismatched, sorted and unique.
    #[must_use]
    pub fn flagged_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<&str> = self.missing_in_cache.iter().map(String::as_str).collect();
        ids.extend(self.mismatched.iter().map(|m| m.external_id.as_str()));
        ids.into_iter().map(str::to_string).collect()
    }
}

/// Compares remote records with cached ones.
pub struct BackfillDoctor {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CacheStore>,
    page_size: u32,
    max_window_days: i64,
}

impl BackfillDoctor {
    #[must_use]
    pub fn new(source: Arc<dyn RecordSource>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            source,
            store,
            page_size: DEFAULT_PAGE_SIZE,
            max_window_days: MAX_WINDOW_DAYS,
        }
    }

    #[must_use]
    pub const fn with_paging(mut self, page_size: u32, max_window_days: i64) -> Self {
        self.page_size = page_size;
        self.max_window_days = max_window_days;
        self
    }

    /// Diff remote and cache for `request`.
    ///
    /// # Errors
    ///
    /// Returns fetch or cache query errors. Unmappable remote records are
    /// reported, not raised.
    pub async fn run(&self, request: &DoctorRequest) -> Result<DoctorReport> {
        let DoctorRequest { range, resource } = *request;
        if !resource.is_listable() {
            return Err(HubError::Config(format!(
                "{resource} cannot be checked: the remote has no listing for it"
            )));
        }

        let (remote, unmapped_remote) = self.remote_payloads(resource, &range).await?;

        let mut filter = RecordFilter::resource(resource);
        if resource.is_range_scoped() {
            filter = filter.in_range(range);
        }
        let cached: BTreeMap<String, Value> = self
            .store
            .query(&filter)
            .await?
            .into_iter()
            .map(|row| (row.external_id, row.payload))
            .collect();

        let missing_in_cache: BTreeSet<String> = remote
            .keys()
            .filter(|id| !cached.contains_key(*id))
            .cloned()
            .collect();
        let extra_in_cache: BTreeSet<String> = cached
            .keys()
            .filter(|id| !remote.contains_key(*id))
            .cloned()
            .collect();
        let mismatched: Vec<FieldMismatch> = remote
            .iter()
            .filter_map(|(id, payload)| cached.get(id).map(|row| diff::compare(id, payload, row)))
            .flatten()
            .collect();

        let report = DoctorReport {
            checked_range: range,
            resource,
            remote_count: remote.len(),
            cached_count: cached.len(),
            missing_in_cache,
            mismatched,
            extra_in_cache,
            unmapped_remote,
        };
        tracing::info!(
            %resource,
            range = %range,
            remote = report.remote_count,
            cached = report.cached_count,
            missing = report.missing_in_cache.len(),
            mismatched = report.mismatched.len(),
            extra = report.extra_in_cache.len(),
            "Backfill doctor finished"
        );
        Ok(report)
    }

    /// Mapped payloads keyed by id, plus the records that failed to map.
    async fn remote_payloads(
        &self,
        resource: Resource,
        range: &SyncRange,
    ) -> Result<(BTreeMap<String, Value>, Vec<SyncFailure>)> {
        let windows: Vec<Option<SyncRange>> = if resource.is_range_scoped() {
            range.windows(self.max_window_days).into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut payloads = BTreeMap::new();
        let mut unmapped = Vec::new();
        for window in windows {
            let mut cursor = PageCursor::new(self.source.clone(), resource, self.page_size, window);
            while let Some(page) = cursor.next_page().await? {
                for raw in &page.items {
                    let mapped = map_record(resource, raw).and_then(|m| {
                        let payload = m.record.to_payload()?;
                        Ok((m.record, payload))
                    });
                    match mapped {
                        Ok((record, payload)) => {
                            let in_range = !resource.is_range_scoped()
                                || record.occurred_at().is_some_and(|at| range.contains(at));
                            if in_range {
                                payloads.insert(record.external_id().to_string(), payload);
                            }
                        }
                        Err(e) => unmapped.push(SyncFailure {
                            resource,
                            external_id: external_id_of(raw)
                                .unwrap_or_else(|| "<unknown>".to_string()),
                            reason: e.to_string(),
                        }),
                    }
                }
            }
        }
        Ok((payloads, unmapped))
    }
}
