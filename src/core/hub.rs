//! Wiring of the sync core from resolved configuration.

use std::sync::Arc;

use crate::core::api::{ClientSettings, KiwifyClient, RecordSource};
use crate::core::clock::{Clock, SystemClock};
use crate::core::doctor::BackfillDoctor;
use crate::core::http::build_client;
use crate::core::range::SyncRange;
use crate::core::sync::{SyncEngine, SyncSettings};
use crate::core::token::{OAuthTransport, TokenManager};
use crate::error::Result;
use crate::storage::cache::CacheStore;
use crate::storage::config::ResolvedConfig;
use crate::storage::sqlite::SqliteCacheStore;

/// Every collaborator a command or route needs, built once.
pub struct Hub {
    pub tokens: Arc<TokenManager>,
    pub client: Arc<KiwifyClient>,
    pub store: Arc<dyn CacheStore>,
    pub engine: SyncEngine,
    pub doctor: BackfillDoctor,
    pub clock: Arc<dyn Clock>,
    pub default_range_days: u32,
}

impl Hub {
    /// Build against the configured `SQLite` cache and the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HubError::AuthNotConfigured`] without
    /// credentials, or a cache error when the database cannot be opened.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let store = Arc::new(SqliteCacheStore::open(&config.cache_path)?);
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    /// Build with an explicit store and clock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HubError::AuthNotConfigured`] without
    /// credentials, or a network error if the HTTP client cannot be built.
    pub fn with_store(
        config: &ResolvedConfig,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let credentials = config.credentials()?.clone();
        let http = build_client(config.timeout)?;

        let transport = OAuthTransport::new(
            http.clone(),
            config.base_url.clone(),
            credentials,
            config.timeout,
        );
        let tokens = Arc::new(TokenManager::new(
            Arc::new(transport),
            clock.clone(),
            config.token.clone(),
        ));

        let client = Arc::new(KiwifyClient::new(
            http,
            tokens.clone(),
            ClientSettings {
                base_url: config.base_url.clone(),
                account_id: config.account_id.clone(),
                partner_id: config.partner_id.clone(),
                retry: config.retry.clone(),
                timeout: config.timeout,
            },
        ));
        let source: Arc<dyn RecordSource> = client.clone();

        let engine = SyncEngine::new(
            source.clone(),
            store.clone(),
            clock.clone(),
            SyncSettings {
                page_size: config.page_size,
                max_window_days: config.max_window_days,
            },
        );
        let doctor = BackfillDoctor::new(source, store.clone())
            .with_paging(config.page_size, config.max_window_days);

        Ok(Self {
            tokens,
            client,
            store,
            engine,
            doctor,
            clock,
            default_range_days: config.default_range_days,
        })
    }

    /// The last `default_range_days` days, ending tomorrow.
    #[must_use]
    pub fn default_range(&self) -> SyncRange {
        SyncRange::last_days(self.clock.now(), self.default_range_days)
    }
}
