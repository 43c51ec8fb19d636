//! `SQLite`-backed [`CacheStore`].
//!
//! Timestamps are stored as millisecond RFC 3339 strings in UTC so that
//! lexical comparison matches chronological order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::core::models::Resource;
use crate::error::{HubError, Result};
use crate::storage::cache::{CacheStore, CachedRecord, NewCachedRecord, RecordFilter, Watermark};
use crate::storage::schema::run_migrations;

const RECORD_COLUMNS: &str =
    "local_id, resource, external_id, status, occurred_at, payload, raw, synced_at";

/// Cache store on a single `SQLite` connection.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Create or open a cache database at the given path.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the database
    /// cannot be opened, or migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)
            .map_err(|e| HubError::Cache(format!("open cache db {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| HubError::Cache(format!("enable WAL: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory cache (useful for tests).
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| HubError::Cache(format!("open in-memory db: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select_one(
        conn: &Connection,
        resource: Resource,
        external_id: &str,
    ) -> rusqlite::Result<Option<CachedRecord>> {
        conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM cached_records WHERE resource = ?1 AND external_id = ?2"
            ),
            params![resource.as_str(), external_id],
            row_to_record,
        )
        .optional()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn upsert(&self, record: NewCachedRecord) -> Result<CachedRecord> {
        let write_err = |e: &dyn std::fmt::Display| HubError::CacheWrite {
            external_id: record.external_id.clone(),
            reason: e.to_string(),
        };
        let payload = serde_json::to_string(&record.payload)?;
        let raw = serde_json::to_string(&record.raw)?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO cached_records \
                (resource, external_id, status, occurred_at, payload, raw, synced_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (resource, external_id) DO UPDATE SET \
                status = excluded.status, \
                occurred_at = excluded.occurred_at, \
                payload = excluded.payload, \
                raw = excluded.raw, \
                synced_at = excluded.synced_at \
             WHERE excluded.synced_at >= cached_records.synced_at",
            params![
                record.resource.as_str(),
                record.external_id,
                record.status,
                record.occurred_at.map(format_ts),
                payload,
                raw,
                format_ts(record.synced_at),
            ],
        )
        .map_err(|e| write_err(&e))?;

        Self::select_one(&conn, record.resource, &record.external_id)
            .map_err(|e| write_err(&e))?
            .ok_or_else(|| write_err(&"row missing after upsert"))
    }

    async fn get(&self, resource: Resource, external_id: &str) -> Result<Option<CachedRecord>> {
        Self::select_one(&self.conn(), resource, external_id)
            .map_err(|e| HubError::Cache(format!("get {resource}/{external_id}: {e}")))
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CachedRecord>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM cached_records WHERE resource = ?1");
        let mut args: Vec<String> = vec![filter.resource.as_str().to_string()];
        if let Some(range) = filter.range {
            args.push(format_ts(range.start()));
            sql.push_str(&format!(" AND occurred_at >= ?{}", args.len()));
            args.push(format_ts(range.end()));
            sql.push_str(&format!(" AND occurred_at < ?{}", args.len()));
        }
        if let Some(status) = &filter.status {
            args.push(status.clone());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY occurred_at, external_id");

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| HubError::Cache(format!("prepare query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_record)
            .map_err(|e| HubError::Cache(format!("query {}: {e}", filter.resource)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| HubError::Cache(format!("read {} rows: {e}", filter.resource)))
    }

    async fn load_watermark(&self, key: &str) -> Result<Option<Watermark>> {
        let row = self
            .conn()
            .query_row(
                "SELECT cursor, last_run_at, last_stats FROM sync_watermarks WHERE key = ?1",
                [key],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| HubError::Cache(format!("load watermark {key}: {e}")))?;

        let Some((cursor, last_run_at, last_stats)) = row else {
            return Ok(None);
        };
        Ok(Some(Watermark {
            key: key.to_string(),
            cursor: cursor.as_deref().map(serde_json::from_str).transpose()?,
            last_run_at: parse_ts(&last_run_at)
                .map_err(|e| HubError::Cache(format!("watermark {key}: {e}")))?,
            last_stats: last_stats.as_deref().map(serde_json::from_str).transpose()?,
        }))
    }

    async fn save_watermark(&self, watermark: &Watermark) -> Result<()> {
        let cursor = watermark.cursor.as_ref().map(serde_json::to_string).transpose()?;
        let stats = watermark
            .last_stats
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()
            .execute(
                "INSERT INTO sync_watermarks (key, cursor, last_run_at, last_stats) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT (key) DO UPDATE SET \
                    cursor = excluded.cursor, \
                    last_run_at = excluded.last_run_at, \
                    last_stats = excluded.last_stats",
                params![
                    watermark.key,
                    cursor,
                    format_ts(watermark.last_run_at),
                    stats
                ],
            )
            .map_err(|e| HubError::Cache(format!("save watermark {}: {e}", watermark.key)))?;
        Ok(())
    }

    async fn clear_watermark(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM sync_watermarks WHERE key = ?1", [key])
            .map_err(|e| HubError::Cache(format!("clear watermark {key}: {e}")))?;
        Ok(())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CachedRecord> {
    let resource: String = row.get(1)?;
    let occurred_at: Option<String> = row.get(4)?;
    let payload: String = row.get(5)?;
    let raw: String = row.get(6)?;
    let synced_at: String = row.get(7)?;

    Ok(CachedRecord {
        local_id: row.get(0)?,
        resource: Resource::from_arg(&resource).map_err(|e| conversion_err(1, e))?,
        external_id: row.get(2)?,
        status: row.get(3)?,
        occurred_at: occurred_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| conversion_err(4, e))?,
        payload: serde_json::from_str::<Value>(&payload).map_err(|e| conversion_err(5, e))?,
        raw: serde_json::from_str::<Value>(&raw).map_err(|e| conversion_err(6, e))?,
        synced_at: parse_ts(&synced_at).map_err(|e| conversion_err(7, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::SyncCursor;
    use crate::core::range::SyncRange;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, 12, 0, 0).unwrap()
    }

    fn record(id: &str, status: &str, occurred: u32, synced: u32) -> NewCachedRecord {
        NewCachedRecord {
            resource: Resource::Sales,
            external_id: id.to_string(),
            status: Some(status.to_string()),
            occurred_at: Some(at(occurred)),
            payload: json!({"status": status, "gross_cents": 1000}),
            raw: json!({"id": id, "status": status}),
            synced_at: at(synced),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_local_id() {
        let store = SqliteCacheStore::open_in_memory().expect("open");
        let first = store.upsert(record("s1", "pending", 1, 2)).await.expect("insert");
        let again = store.upsert(record("s1", "pending", 1, 2)).await.expect("replay");
        let updated = store.upsert(record("s1", "approved", 1, 3)).await.expect("update");

        assert_eq!(first, again);
        assert_eq!(first.local_id, updated.local_id);
        assert_eq!(updated.status.as_deref(), Some("approved"));
        assert_eq!(updated.raw["status"], "approved");
    }

    #[tokio::test]
    async fn stale_write_is_ignored() {
        let store = SqliteCacheStore::open_in_memory().expect("open");
        store.upsert(record("s1", "approved", 1, 5)).await.expect("newer");
        let row = store.upsert(record("s1", "pending", 1, 4)).await.expect("older");
        assert_eq!(row.status.as_deref(), Some("approved"));
        assert_eq!(row.synced_at, at(5));
    }

    #[tokio::test]
    async fn query_is_half_open_and_ordered() {
        let store = SqliteCacheStore::open_in_memory().expect("open");
        store.upsert(record("s3", "approved", 3, 9)).await.expect("s3");
        store.upsert(record("s1", "approved", 1, 9)).await.expect("s1");
        store.upsert(record("s2", "pending", 2, 9)).await.expect("s2");

        let range = SyncRange::new(at(1), at(3)).expect("range");
        let rows = store
            .query(&RecordFilter::resource(Resource::Sales).in_range(range))
            .await
            .expect("query");
        let ids: Vec<_> = rows.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2"]);

        let mut filter = RecordFilter::resource(Resource::Sales);
        filter.status = Some("pending".into());
        assert_eq!(store.query(&filter).await.expect("status").len(), 1);
        assert!(
            store
                .query(&RecordFilter::resource(Resource::Products))
                .await
                .expect("products")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn watermark_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.sqlite");
        let mark = Watermark {
            key: "sales".into(),
            cursor: Some(SyncCursor {
                resource: Resource::Sales,
                window: 1,
                page: 4,
            }),
            last_run_at: at(7),
            last_stats: Some(json!({"upserted": 40})),
        };

        {
            let store = SqliteCacheStore::open(&path).expect("open");
            store.save_watermark(&mark).await.expect("save");
        }
        let store = SqliteCacheStore::open(&path).expect("reopen");
        assert_eq!(store.load_watermark("sales").await.expect("load"), Some(mark));
        store.clear_watermark("sales").await.expect("clear");
        assert!(store.load_watermark("sales").await.expect("load").is_none());
    }
}
