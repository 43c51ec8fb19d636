//! Admin route table.

use std::collections::HashMap;
use std::fmt;

use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::ServerState;
use super::envelope::{self, Body};
use crate::core::api::{DEFAULT_PAGE_SIZE, PageRequest};
use crate::core::doctor::DoctorRequest;
use crate::core::models::Resource;
use crate::core::range::SyncRange;
use crate::core::sync::SyncRequest;

/// Header carrying the admin key when one is configured.
pub const ADMIN_KEY_HEADER: &str = "x-internal-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Auth,
    Reconcile,
    Doctor,
    Sale(&'a str),
    Products,
    Product(&'a str),
    Balances,
    Balance(&'a str),
    Withdrawals,
    Withdrawal(&'a str),
    Account,
}

impl<'a> Route<'a> {
    fn parse(segments: &[&'a str]) -> Option<Self> {
        let route = match segments {
            ["healthz"] => Self::Health,
            ["auth"] => Self::Auth,
            ["reconcile"] => Self::Reconcile,
            ["backfill-doctor"] => Self::Doctor,
            ["sales", id] => Self::Sale(id),
            ["products"] => Self::Products,
            ["products", id] => Self::Product(id),
            ["balances"] => Self::Balances,
            ["balances", id] => Self::Balance(id),
            ["withdrawals"] => Self::Withdrawals,
            ["withdrawals", id] => Self::Withdrawal(id),
            ["account"] => Self::Account,
            _ => return None,
        };
        Some(route)
    }

    fn allows(self, method: &Method) -> bool {
        match self {
            Self::Auth => method == Method::GET || method == Method::POST,
            Self::Reconcile => method == Method::POST,
            _ => method == Method::GET,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReconcileBody {
    range: Option<SyncRange>,
    start_date: Option<String>,
    end_date: Option<String>,
    resources: Option<Vec<String>>,
    resume: bool,
    persist: bool,
    budget_seconds: Option<u64>,
}

/// Route one request. Never fails: every outcome is an envelope.
pub async fn handle<B>(state: &ServerState, req: Request<B>) -> Response<Body>
where
    B: hyper::body::Body,
    B::Error: fmt::Display,
{
    let (parts, body) = req.into_parts();
    let segments: Vec<&str> = parts.uri.path().split('/').filter(|s| !s.is_empty()).collect();
    let Some(route) = Route::parse(&segments) else {
        return envelope::failure(StatusCode::NOT_FOUND, "not_found", "no such route");
    };
    if !route.allows(&parts.method) {
        return envelope::failure(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{} is not allowed here", parts.method),
        );
    }

    if route != Route::Health
        && let Some(expected) = &state.admin_key
    {
        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return envelope::failure(StatusCode::UNAUTHORIZED, "not_authorized", "admin key required");
        }
    }

    let query: HashMap<String, String> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let started = std::time::Instant::now();
    let response = tokio::time::timeout(
        state.request_timeout,
        dispatch(state, route, &parts.method, &query, body),
    )
    .await
    .unwrap_or_else(|_| {
        envelope::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "request_timeout",
            format!("request exceeded {}s", state.request_timeout.as_secs()),
        )
    });
    tracing::info!(
        method = %parts.method,
        path = parts.uri.path(),
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Admin request"
    );
    response
}

async fn dispatch<B>(
    state: &ServerState,
    route: Route<'_>,
    method: &Method,
    query: &HashMap<String, String>,
    body: B,
) -> Response<Body>
where
    B: hyper::body::Body,
    B::Error: fmt::Display,
{
    let hub = &state.hub;
    match route {
        Route::Health => envelope::ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Route::Auth if method == Method::GET => envelope::ok(hub.tokens.metadata()),
        Route::Auth => match hub.tokens.token(true).await {
            Ok(_) => envelope::ok(hub.tokens.metadata()),
            Err(e) => envelope::core_failure(failure_code(route), &e),
        },
        Route::Reconcile => {
            let bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return envelope::invalid_request(format!("cannot read body: {e}")),
            };
            let request = match reconcile_request(state, &bytes) {
                Ok(request) => request,
                Err(message) => return envelope::invalid_request(message),
            };
            match hub.engine.run_sync(&request).await {
                Ok(result) => envelope::ok(result),
                Err(e) => envelope::core_failure(failure_code(route), &e),
            }
        }
        Route::Doctor => {
            let range = match query_range(state, query) {
                Ok(range) => range,
                Err(message) => return envelope::invalid_request(message),
            };
            let resource = match query.get("resource").map(|r| Resource::from_arg(r)) {
                None => Resource::Sales,
                Some(Ok(resource)) => resource,
                Some(Err(e)) => return envelope::invalid_request(e),
            };
            let repair = query
                .get("repair")
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

            let report = match hub.doctor.run(&DoctorRequest { range, resource }).await {
                Ok(report) => report,
                Err(e) => return envelope::core_failure(failure_code(route), &e),
            };
            if !repair || report.flagged_ids().is_empty() {
                return envelope::ok(json!({ "report": report, "repair": null }));
            }
            match hub.engine.resync_records(resource, &report.flagged_ids()).await {
                Ok(repair) => envelope::ok(json!({ "report": report, "repair": repair })),
                Err(e) => envelope::core_failure(failure_code(route), &e),
            }
        }
        Route::Sale(id) => passthrough(route, hub.client.get_sale(id).await),
        Route::Products => match page_request(query) {
            Ok(request) => passthrough(route, hub.client.list_products(&request).await),
            Err(message) => envelope::invalid_request(message),
        },
        Route::Product(id) => passthrough(route, hub.client.get_product(id).await),
        Route::Balances => passthrough(route, hub.client.fetch_balances().await),
        Route::Balance(id) => passthrough(route, hub.client.fetch_balance_by_legal_entity(id).await),
        Route::Withdrawals => match page_request(query) {
            Ok(request) => passthrough(
                route,
                hub.client
                    .list_withdrawals(&request, query.get("legal_entity_id").map(String::as_str))
                    .await,
            ),
            Err(message) => envelope::invalid_request(message),
        },
        Route::Withdrawal(id) => passthrough(route, hub.client.get_withdrawal(id).await),
        Route::Account => passthrough(route, hub.client.fetch_account().await),
    }
}

/// Envelope `code` for a failed core call on `route`.
const fn failure_code(route: Route<'_>) -> &'static str {
    match route {
        Route::Health => "internal_error",
        Route::Auth => "token_refresh_failed",
        Route::Reconcile => "reconcile_failed",
        Route::Doctor => "doctor_failed",
        Route::Sale(_) => "sale_fetch_failed",
        Route::Products => "products_list_failed",
        Route::Product(_) => "product_fetch_failed",
        Route::Balances => "balances_fetch_failed",
        Route::Balance(_) => "balance_fetch_failed",
        Route::Withdrawals => "withdrawals_list_failed",
        Route::Withdrawal(_) => "withdrawal_fetch_failed",
        Route::Account => "account_fetch_failed",
    }
}

fn passthrough<T: serde::Serialize>(route: Route<'_>, result: crate::error::Result<T>) -> Response<Body> {
    match result {
        Ok(data) => envelope::ok(data),
        Err(e) => envelope::core_failure(failure_code(route), &e),
    }
}

fn query_range(state: &ServerState, query: &HashMap<String, String>) -> Result<SyncRange, String> {
    let get = |keys: [&str; 2]| keys.iter().find_map(|k| query.get(*k)).map(String::as_str);
    state
        .hub
        .default_range()
        .with_bounds(get(["start", "startDate"]), get(["end", "endDate"]))
        .map_err(|e| e.to_string())
}

fn page_request(query: &HashMap<String, String>) -> Result<PageRequest, String> {
    let number = |key: &str, default: u32| -> Result<u32, String> {
        query.get(key).map_or(Ok(default), |raw| {
            raw.parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("{key} must be a positive integer"))
        })
    };
    Ok(PageRequest {
        page: number("page", 1)?,
        page_size: number("page_size", DEFAULT_PAGE_SIZE)?,
        range: None,
    })
}

fn reconcile_request(state: &ServerState, bytes: &[u8]) -> Result<SyncRequest, String> {
    let body: ReconcileBody = if bytes.iter().all(u8::is_ascii_whitespace) {
        ReconcileBody::default()
    } else {
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON body: {e}"))?
    };

    let range = match body.range {
        Some(range) => range,
        None => state
            .hub
            .default_range()
            .with_bounds(body.start_date.as_deref(), body.end_date.as_deref())
            .map_err(|e| e.to_string())?,
    };
    let resources = body
        .resources
        .unwrap_or_default()
        .iter()
        .map(|name| Resource::from_arg(name))
        .collect::<crate::error::Result<Vec<_>>>()
        .map_err(|e| e.to_string())?;

    let mut request = SyncRequest::new(range).with_resources(resources);
    request.resume = body.resume;
    request.persist_watermark = body.persist || body.resume;
    request.budget = body
        .budget_seconds
        .map(std::time::Duration::from_secs)
        .or(state.sync_budget);
    Ok(request)
}
