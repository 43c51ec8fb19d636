//! Admin HTTP surface over a real listener, backed by a mock remote.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sigmahub::core::models::Resource;
use sigmahub::server::{self, ADMIN_KEY_HEADER, ServerState};
use sigmahub::storage::cache::{CacheStore, MemoryCacheStore, RecordFilter};
use sigmahub::{TestDir, sale_payload, sales_batch};

use common::fixtures::{TestHub, hub_for, listing, mount_token};

const KEY: &str = "admin-secret";

struct Running {
    addr: SocketAddr,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
    store: Arc<MemoryCacheStore>,
    _dir: TestDir,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(path))
            .header(ADMIN_KEY_HEADER, KEY)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .header(ADMIN_KEY_HEADER, KEY)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .expect("server stops")
            .unwrap();
    }
}

async fn start(remote: &MockServer) -> Running {
    let TestHub { hub, store, dir, .. } = hub_for(remote);
    let state = Arc::new(ServerState {
        hub,
        admin_key: Some(KEY.to_string()),
        request_timeout: Duration::from_secs(10),
        sync_budget: None,
    });
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server::serve(listener, state, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });
    Running {
        addr,
        client: reqwest::Client::new(),
        shutdown: Some(tx),
        handle,
        store,
        _dir: dir,
    }
}

async fn mount_sales(remote: &MockServer, sales: &[Value]) {
    Mock::given(method("GET"))
        .and(path("/v1/sales"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(sales, sales.len())))
        .mount(remote)
        .await;
}

// =============================================================================
// Routing and authorization
// =============================================================================

#[tokio::test]
async fn health_needs_no_key() {
    let remote = MockServer::start().await;
    let running = start(&remote).await;

    let response = running.client.get(running.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["status"], "ok");

    running.stop().await;
}

#[tokio::test]
async fn missing_admin_key_is_rejected() {
    let remote = MockServer::start().await;
    let running = start(&remote).await;

    let response = running.client.get(running.url("/account")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "not_authorized");
    assert!(body.get("data").is_none());

    running.stop().await;
}

#[tokio::test]
async fn unknown_route_and_wrong_method() {
    let remote = MockServer::start().await;
    let running = start(&remote).await;

    let (status, body) = running.get("/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "not_found");

    let (status, body) = running.get("/reconcile").await;
    assert_eq!(status, 405);
    assert_eq!(body["code"], "method_not_allowed");

    running.stop().await;
}

// =============================================================================
// Core operations
// =============================================================================

#[tokio::test]
async fn reconcile_runs_a_sync() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    mount_sales(&remote, &sales_batch(3, "2024-01-05T00:00:00Z")).await;
    let running = start(&remote).await;

    let (status, body) = running
        .post(
            "/reconcile",
            json!({
                "startDate": "2024-01-01",
                "endDate": "2024-02-01",
                "resources": ["sales"],
            }),
        )
        .await;

    assert_eq!(status, 200, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["done"], true);
    assert_eq!(body["data"]["upserted"], 3);
    assert_eq!(body["data"]["pagesFetched"], 1);

    let cached = running
        .store
        .query(&RecordFilter::resource(Resource::Sales))
        .await
        .unwrap();
    assert_eq!(cached.len(), 3);

    running.stop().await;
}

#[tokio::test]
async fn reconcile_rejects_bad_input() {
    let remote = MockServer::start().await;
    let running = start(&remote).await;

    let (status, body) = running
        .post("/reconcile", json!({ "resources": ["refunds"] }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = running
        .post("/reconcile", json!({ "startDate": "2024-02-01", "endDate": "2024-01-01" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");

    running.stop().await;
}

#[tokio::test]
async fn doctor_reports_missing_records() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    mount_sales(&remote, &sales_batch(2, "2024-01-05T00:00:00Z")).await;
    let running = start(&remote).await;

    let (status, body) = running
        .get("/backfill-doctor?start=2024-01-01&end=2024-02-01")
        .await;

    assert_eq!(status, 200, "{body}");
    let report = &body["data"]["report"];
    assert_eq!(report["remoteCount"], 2);
    assert_eq!(report["missingInCache"], json!(["s-001", "s-002"]));
    assert!(body["data"]["repair"].is_null());

    running.stop().await;
}

#[tokio::test]
async fn auth_refresh_returns_metadata() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    let running = start(&remote).await;

    let (status, body) = running.get("/auth").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["hasToken"], false);

    let (status, body) = running.post("/auth", json!({})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["hasToken"], true);
    assert!(!body.to_string().contains("tok-1"));

    running.stop().await;
}

// =============================================================================
// Passthrough reads
// =============================================================================

#[tokio::test]
async fn sale_passthrough_returns_the_remote_payload() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    Mock::given(method("GET"))
        .and(path("/v1/sales/s-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(sale_payload("s-9", "2024-01-05T10:00:00Z", 4_200)),
        )
        .mount(&remote)
        .await;
    let running = start(&remote).await;

    let (status, body) = running.get("/sales/s-9").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["id"], "s-9");

    running.stop().await;
}

#[tokio::test]
async fn remote_failure_maps_to_500_with_code() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    Mock::given(method("GET"))
        .and(path("/v1/sales/s-1"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unprocessable"))
        .mount(&remote)
        .await;
    let running = start(&remote).await;

    let (status, body) = running.get("/sales/s-1").await;
    assert_eq!(status, 500);
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "sale_fetch_failed");
    assert!(body["error"].is_string());

    running.stop().await;
}

#[tokio::test]
async fn listing_rejects_invalid_paging() {
    let remote = MockServer::start().await;
    let running = start(&remote).await;

    let (status, body) = running.get("/products?page=0").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");

    running.stop().await;
}

#[tokio::test]
async fn listing_failure_uses_the_list_code() {
    let remote = MockServer::start().await;
    mount_token(&remote).await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&remote)
        .await;
    let running = start(&remote).await;

    let (status, body) = running.get("/products").await;
    assert_eq!(status, 500);
    assert_eq!(body["code"], "products_list_failed");

    running.stop().await;
}
