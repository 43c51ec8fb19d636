//! Mock remote setup and collaborator wiring.

use std::sync::Arc;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sigmahub::core::api::RecordSource;
use sigmahub::core::hub::Hub;
use sigmahub::core::sync::{SyncEngine, SyncSettings};
use sigmahub::storage::cache::{CacheStore, MemoryCacheStore};
use sigmahub::{FixedClock, TestDir, test_config};

/// Fixed "now" used by wired collaborators.
pub const NOW: &str = "2024-01-20T12:00:00Z";

/// Mount a working root token endpoint.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

/// A listing body in the remote's `data` + `pagination` shape.
pub fn listing(items: &[Value], total: usize) -> Value {
    json!({
        "data": items,
        "pagination": { "total": total },
    })
}

/// A hub wired against `server` with an in-memory cache and a fixed clock.
pub struct TestHub {
    pub hub: Hub,
    pub store: Arc<MemoryCacheStore>,
    pub clock: Arc<FixedClock>,
    pub dir: TestDir,
}

pub fn hub_for(server: &MockServer) -> TestHub {
    let dir = TestDir::new();
    let config = test_config(&server.uri(), &dir.join("cache.sqlite"));
    let store = Arc::new(MemoryCacheStore::new());
    let clock = Arc::new(FixedClock::at(NOW));
    let hub = Hub::with_store(&config, store.clone(), clock.clone()).expect("hub builds");
    TestHub {
        hub,
        store,
        clock,
        dir,
    }
}

/// An engine over `source` with pages of `page_size`.
pub fn engine(
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CacheStore>,
    clock: Arc<FixedClock>,
    page_size: u32,
) -> SyncEngine {
    SyncEngine::new(
        source,
        store,
        clock,
        SyncSettings {
            page_size,
            max_window_days: 90,
        },
    )
}
