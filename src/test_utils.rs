//! Test utilities for sigmahub.
//!
//! Shared fakes, payload factories, and assertion macros for unit and
//! integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sigmahub::test_utils::*;
//!
//! let source = FixtureSource::new().with_records(Resource::Sales, sales_batch(25, "2024-01-05"));
//! let clock = FixedClock::at("2024-01-20T12:00:00Z");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Value, json};

use crate::core::api::{Page, PageRequest, RecordSource};
use crate::core::clock::Clock;
use crate::core::mapping::external_id_of;
use crate::core::models::Resource;
use crate::core::token::{IssuedToken, TokenTransport};
use crate::error::{HubError, Result};
use crate::storage::config::{CliOverrides, Config, ResolvedConfig};

// =============================================================================
// Clock
// =============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// # Panics
    ///
    /// Panics if `rfc3339` is not a valid timestamp.
    #[must_use]
    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .expect("valid RFC 3339 timestamp")
            .with_timezone(&Utc);
        Self::new(now)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

// =============================================================================
// Token transport
// =============================================================================

/// A token endpoint that counts requests and issues `token-<n>`.
pub struct CountingTransport {
    calls: AtomicUsize,
    expires_in: i64,
    delay: Duration,
    /// Statuses returned, in order, before tokens are issued.
    failures: Mutex<Vec<u16>>,
}

impl CountingTransport {
    #[must_use]
    pub const fn new(expires_in: i64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            expires_in,
            delay: Duration::ZERO,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every request.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next requests with these HTTP statuses.
    #[must_use]
    pub fn failing_with(self, statuses: &[u16]) -> Self {
        *self.failures.lock().expect("failures lock") = statuses.iter().rev().copied().collect();
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenTransport for CountingTransport {
    async fn request_token(&self) -> Result<IssuedToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(status) = self.failures.lock().expect("failures lock").pop() {
            return Err(if status == 401 || status == 403 {
                HubError::Auth {
                    reason: "injected rejection".to_string(),
                    status_code: Some(status),
                }
            } else {
                HubError::remote(status, "injected failure")
            });
        }
        Ok(IssuedToken {
            access_token: format!("token-{n}"),
            token_type: "Bearer".to_string(),
            expires_in: self.expires_in,
            account_id: None,
        })
    }
}

// =============================================================================
// Record source
// =============================================================================

/// An in-memory remote. Pages are cut from each resource's record list in
/// order; sales are filtered by `created_at` against the request window.
#[derive(Default)]
pub struct FixtureSource {
    records: Mutex<BTreeMap<Resource, Vec<Value>>>,
    /// `(resource, page)` answered with this HTTP status.
    page_failures: Mutex<HashMap<(Resource, u32), u16>>,
    page_delay: Duration,
    page_calls: AtomicUsize,
    record_calls: AtomicUsize,
}

impl FixtureSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(self, resource: Resource, records: Vec<Value>) -> Self {
        self.set_records(resource, records);
        self
    }

    #[must_use]
    pub const fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Replace the remote contents of `resource`.
    pub fn set_records(&self, resource: Resource, records: Vec<Value>) {
        self.records
            .lock()
            .expect("records lock")
            .insert(resource, records);
    }

    /// Answer `page` of `resource` with `status` until cleared.
    pub fn fail_page(&self, resource: Resource, page: u32, status: u16) {
        self.page_failures
            .lock()
            .expect("failures lock")
            .insert((resource, page), status);
    }

    pub fn clear_failures(&self) {
        self.page_failures.lock().expect("failures lock").clear();
    }

    #[must_use]
    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    fn visible(&self, resource: Resource, request: &PageRequest) -> Vec<Value> {
        let records = self.records.lock().expect("records lock");
        let all = records.get(&resource).cloned().unwrap_or_default();
        match (resource, request.range) {
            (Resource::Sales, Some(range)) => all
                .into_iter()
                .filter(|sale| created_at(sale).is_none_or(|at| range.contains(at)))
                .collect(),
            _ => all,
        }
    }
}

fn created_at(sale: &Value) -> Option<DateTime<Utc>> {
    let raw = sale.get("created_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl RecordSource for FixtureSource {
    async fn fetch_page(&self, resource: Resource, request: &PageRequest) -> Result<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        let failure = self
            .page_failures
            .lock()
            .expect("failures lock")
            .get(&(resource, request.page))
            .copied();
        if let Some(status) = failure {
            return Err(HubError::remote(status, "injected failure"));
        }

        let items = self.visible(resource, request);
        let total = items.len();
        let size = request.page_size as usize;
        let offset = (request.page as usize - 1) * size;
        let body = json!({
            "data": items.into_iter().skip(offset).take(size).collect::<Vec<_>>(),
            "pagination": { "total": total },
        });
        Page::from_body(request.page, request.page_size, &body)
    }

    async fn fetch_record(&self, resource: Resource, external_id: &str) -> Result<Option<Value>> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().expect("records lock");
        Ok(records.get(&resource).and_then(|items| {
            items
                .iter()
                .find(|item| external_id_of(item).as_deref() == Some(external_id))
                .cloned()
        }))
    }
}

// =============================================================================
// Payload factories
// =============================================================================

/// A remote sale payload with a buyer, as the listing returns it.
#[must_use]
pub fn sale_payload(id: &str, created_at: &str, gross_cents: i64) -> Value {
    json!({
        "id": id,
        "status": "paid",
        "payment_method": "credit_card",
        "created_at": created_at,
        "product": { "id": "prod-1", "name": "Curso Sigma" },
        "customer": {
            "id": format!("cust-{id}"),
            "name": "Maria Silva",
            "email": format!("{id}@example.com"),
        },
        "gross_cents": gross_cents,
        "fee_cents": gross_cents / 10,
        "net_cents": gross_cents - gross_cents / 10,
        "currency": "BRL",
    })
}

/// `count` sales `s-001..`, one hour apart from `first_created_at`.
///
/// # Panics
///
/// Panics if `first_created_at` is not RFC 3339.
#[must_use]
pub fn sales_batch(count: usize, first_created_at: &str) -> Vec<Value> {
    let first = DateTime::parse_from_rfc3339(first_created_at)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc);
    (1..=count)
        .map(|i| {
            let at = first + TimeDelta::hours(i64::try_from(i - 1).unwrap_or(0));
            sale_payload(&format!("s-{i:03}"), &at.to_rfc3339(), 1_000 * i64::try_from(i).unwrap_or(1))
        })
        .collect()
}

/// A remote product payload.
#[must_use]
pub fn product_payload(id: &str, title: &str, price_cents: i64) -> Value {
    json!({
        "id": id,
        "name": title,
        "price_cents": price_cents,
        "currency": "BRL",
        "status": "active",
    })
}

/// A sale the mapper rejects: its timestamp cannot be parsed.
#[must_use]
pub fn malformed_sale(id: &str) -> Value {
    json!({ "id": id, "status": "paid", "created_at": "last tuesday", "gross_cents": 100 })
}

// =============================================================================
// Configuration
// =============================================================================

/// Resolved configuration pointing at `base_url`, with test credentials,
/// immediate retries, and the cache at `cache_path`.
///
/// # Panics
///
/// Panics if the configuration does not resolve.
#[must_use]
pub fn test_config(base_url: &str, cache_path: &Path) -> ResolvedConfig {
    let mut config = Config::default();
    config.remote.client_id = Some("client-id".to_string());
    config.remote.client_secret = Some("client-secret".to_string());
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    let overrides = CliOverrides {
        base_url: Some(base_url.to_string()),
        cache_path: Some(cache_path.to_path_buf()),
        ..CliOverrides::default()
    };
    ResolvedConfig::resolve_with(&config, &overrides, |_| None).expect("test config resolves")
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// A temporary directory that is cleaned up when dropped.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Path of a file inside the directory (not created).
    #[must_use]
    pub fn join(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }

    /// Write a file, creating parent directories as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
        path
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = &$haystack;
        let needle = &$needle;
        assert!(
            haystack.contains(needle.as_ref() as &str),
            "Expected string to contain {:?}\n\nActual string:\n{}",
            needle,
            haystack
        );
    };
}

/// Assert that a string is valid JSON and return the parsed value.
#[macro_export]
macro_rules! assert_json_valid {
    ($json:expr) => {{
        let json_str = &$json;
        match serde_json::from_str::<serde_json::Value>(json_str) {
            Ok(value) => value,
            Err(e) => panic!("Expected valid JSON, got error: {}\n\nInput:\n{}", e, json_str),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::map_record;
    use crate::core::range::SyncRange;

    #[test]
    fn sale_factory_maps_cleanly() {
        let mapped = map_record(Resource::Sales, &sale_payload("s-1", "2024-01-05T10:00:00Z", 5_000)).unwrap();
        assert_eq!(mapped.record.external_id(), "s-1");
        assert_eq!(mapped.derived.len(), 1);
        assert!(map_record(Resource::Sales, &malformed_sale("bad")).is_err());
    }

    #[tokio::test]
    async fn fixture_source_pages_and_filters() {
        let source = FixtureSource::new().with_records(
            Resource::Sales,
            sales_batch(25, "2024-01-05T00:00:00Z"),
        );
        let range = SyncRange::parse("2024-01-01", "2024-02-01").unwrap();
        let request = PageRequest {
            page: 3,
            page_size: 10,
            range: Some(range),
        };
        let page = source.fetch_page(Resource::Sales, &request).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_more);

        let outside = SyncRange::parse("2023-01-01", "2023-02-01").unwrap();
        let page = source
            .fetch_page(Resource::Sales, &PageRequest::first(10).with_range(outside))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(source.page_calls(), 2);
    }

    #[tokio::test]
    async fn fixture_source_injects_failures() {
        let source = FixtureSource::new();
        source.fail_page(Resource::Products, 1, 503);
        let err = source
            .fetch_page(Resource::Products, &PageRequest::first(10))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        source.clear_failures();
        assert!(source.fetch_page(Resource::Products, &PageRequest::first(10)).await.is_ok());
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::at("2024-01-01T00:00:00Z");
        clock.advance(TimeDelta::minutes(5));
        assert_eq!(clock.now().to_rfc3339(), "2024-01-01T00:05:00+00:00");
    }
}
