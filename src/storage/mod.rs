//! Storage for configuration and the local record cache.

pub mod cache;
pub mod config;
pub mod paths;
pub mod schema;
pub mod sqlite;

pub use cache::{CacheStore, CachedRecord, MemoryCacheStore, NewCachedRecord, RecordFilter, Watermark};
pub use config::{CliOverrides, Config, ConfigSource, ConfigSources, ResolvedConfig};
pub use paths::AppPaths;
pub use schema::run_migrations;
pub use sqlite::SqliteCacheStore;
