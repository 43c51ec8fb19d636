//! Remote API Client for the Kiwify public API.
//!
//! Every call attaches the current bearer token and account headers. A 401
//! triggers one forced token refresh and one replay; 429 and 5xx answers are
//! retried with bounded backoff; any other non-2xx is surfaced immediately
//! as [`HubError::RemoteApi`].

pub mod pagination;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

pub use pagination::{DEFAULT_PAGE_SIZE, Page, PageCursor, PageRequest};

use crate::core::http::{body_excerpt, parse_retry_after, resolve_api_url, transport_error};
use crate::core::models::Resource;
use crate::core::range::SyncRange;
use crate::core::retry::{RetryPolicy, classify, retry_with_backoff};
use crate::core::token::{AccessToken, TokenManager};
use crate::error::{HubError, Result};

/// Header carrying the Kiwify account id.
pub const ACCOUNT_HEADER: &str = "x-kiwify-account-id";
/// Header carrying the partner id, when configured.
pub const PARTNER_HEADER: &str = "x-kiwify-partner-id";

/// Source of remote records, as seen by the sync engine and the doctor.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one listing page.
    async fn fetch_page(&self, resource: Resource, request: &PageRequest) -> Result<Page>;

    /// Fetch one record by id. `Ok(None)` when the remote answers 404.
    async fn fetch_record(&self, resource: Resource, external_id: &str) -> Result<Option<Value>>;
}

/// Filters for the sales listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesQuery {
    pub page: u32,
    pub page_size: u32,
    pub range: SyncRange,
    pub status: Option<String>,
    pub product_id: Option<String>,
}

impl SalesQuery {
    #[must_use]
    pub const fn new(range: SyncRange, page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            range,
            status: None,
            product_id: None,
        }
    }
}

/// Connection settings for [`KiwifyClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub account_id: Option<String>,
    pub partner_id: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

/// Authenticated client for the Kiwify public API.
pub struct KiwifyClient {
    http: Client,
    tokens: Arc<TokenManager>,
    settings: ClientSettings,
}

impl KiwifyClient {
    #[must_use]
    pub const fn new(http: Client, tokens: Arc<TokenManager>, settings: ClientSettings) -> Self {
        Self {
            http,
            tokens,
            settings,
        }
    }

    #[must_use]
    pub const fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// `GET /account`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn fetch_account(&self) -> Result<Value> {
        self.get_json("/account", &[]).await
    }

    /// `GET /products?page_number&page_size`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn list_products(&self, request: &PageRequest) -> Result<Page> {
        let body = self.get_json("/products", &page_params(request.page, request.page_size)).await?;
        Page::from_body(request.page, request.page_size, &body)
    }

    /// `GET /products/{id}`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn get_product(&self, product_id: &str) -> Result<Value> {
        self.get_json(&format!("/products/{}", encode_segment(product_id)), &[]).await
    }

    /// `GET /sales` for one date window.
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn list_sales(&self, query: &SalesQuery) -> Result<Page> {
        let (start_date, end_date) = query.range.remote_dates();
        let mut params = page_params(query.page, query.page_size);
        params.push(("start_date", start_date.to_string()));
        params.push(("end_date", end_date.to_string()));
        params.push(("view_full_sale_details", "true".to_string()));
        if let Some(status) = &query.status {
            params.push(("status", status.clone()));
        }
        if let Some(product_id) = &query.product_id {
            params.push(("product_id", product_id.clone()));
        }
        let body = self.get_json("/sales", &params).await?;
        Page::from_body(query.page, query.page_size, &body)
    }

    /// `GET /sales/{id}`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn get_sale(&self, sale_id: &str) -> Result<Value> {
        self.get_json(&format!("/sales/{}", encode_segment(sale_id)), &[]).await
    }

    /// `GET /balances`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn fetch_balances(&self) -> Result<Value> {
        self.get_json("/balances", &[]).await
    }

    /// `GET /balances/{legal_entity_id}`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn fetch_balance_by_legal_entity(&self, legal_entity_id: &str) -> Result<Value> {
        self.get_json(&format!("/balances/{}", encode_segment(legal_entity_id)), &[])
            .await
    }

    /// `GET /withdrawals?legal_entity_id&page_number&page_size`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn list_withdrawals(
        &self,
        request: &PageRequest,
        legal_entity_id: Option<&str>,
    ) -> Result<Page> {
        let mut params = page_params(request.page, request.page_size);
        if let Some(id) = legal_entity_id {
            params.push(("legal_entity_id", id.to_string()));
        }
        let body = self.get_json("/withdrawals", &params).await?;
        Page::from_body(request.page, request.page_size, &body)
    }

    /// `GET /withdrawals/{id}`
    ///
    /// # Errors
    ///
    /// Returns auth, remote or parse errors.
    pub async fn get_withdrawal(&self, withdrawal_id: &str) -> Result<Value> {
        self.get_json(&format!("/withdrawals/{}", encode_segment(withdrawal_id)), &[])
            .await
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.build_url(path, params)?;
        let refreshed_flag = AtomicBool::new(false);
        let refreshed = &refreshed_flag;
        retry_with_backoff(&self.settings.retry, classify, move |attempt| {
            let url = url.clone();
            async move {
                tracing::debug!(%url, attempt, "GET");
                self.authorized_get(url, refreshed).await
            }
        })
        .await
    }

    /// One attempt, including the single forced-refresh replay on 401.
    async fn authorized_get(&self, url: Url, refreshed: &AtomicBool) -> Result<Value> {
        let token = self.tokens.token(false).await?;
        let response = self.send(url.clone(), &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response, self.settings.timeout).await;
        }

        if refreshed.swap(true, Ordering::SeqCst) {
            return Err(unauthorized(response).await);
        }
        tracing::warn!(%url, "Remote rejected the access token, forcing a refresh");
        let token = self.tokens.token(true).await?;
        let response = self.send(url, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(unauthorized(response).await);
        }
        decode(response, self.settings.timeout).await
    }

    async fn send(&self, url: Url, token: &AccessToken) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(account_id) = self
            .settings
            .account_id
            .as_deref()
            .or(token.account_id.as_deref())
        {
            request = request.header(ACCOUNT_HEADER, account_id);
        }
        if let Some(partner_id) = &self.settings.partner_id {
            request = request.header(PARTNER_HEADER, partner_id);
        }
        request
            .send()
            .await
            .map_err(|e| transport_error(&e, self.settings.timeout))
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let raw = resolve_api_url(&self.settings.base_url, path);
        let mut url = Url::parse(&raw)
            .map_err(|e| HubError::Config(format!("invalid remote URL '{raw}': {e}")))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl RecordSource for KiwifyClient {
    async fn fetch_page(&self, resource: Resource, request: &PageRequest) -> Result<Page> {
        match resource {
            Resource::Products => self.list_products(request).await,
            Resource::Sales => {
                let range = request.range.ok_or_else(|| {
                    HubError::InvalidRange("sales listing requires a date range".to_string())
                })?;
                self.list_sales(&SalesQuery::new(range, request.page, request.page_size))
                    .await
            }
            Resource::Withdrawals => self.list_withdrawals(request, None).await,
            Resource::Balances => {
                let body = self.fetch_balances().await?;
                let page = Page::from_body(1, u32::MAX, &body)?;
                Ok(Page::single(page.items))
            }
            Resource::Customers => Err(HubError::Config(
                "customers have no remote listing; they are derived from sales".to_string(),
            )),
        }
    }

    async fn fetch_record(&self, resource: Resource, external_id: &str) -> Result<Option<Value>> {
        let result = match resource {
            Resource::Products => self.get_product(external_id).await,
            Resource::Sales => self.get_sale(external_id).await,
            Resource::Withdrawals => self.get_withdrawal(external_id).await,
            Resource::Balances => self
                .fetch_balance_by_legal_entity(external_id)
                .await
                .map(|body| with_default_id(body, "legal_entity_id", external_id)),
            Resource::Customers => {
                return Err(HubError::Config(
                    "customers cannot be fetched individually".to_string(),
                ));
            }
        };
        match result {
            Ok(Value::Null) => Ok(None),
            Ok(body) => Ok(Some(unwrap_data(body))),
            Err(HubError::RemoteApi { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn page_params(page: u32, page_size: u32) -> Vec<(&'static str, String)> {
    vec![
        ("page_number", page.to_string()),
        ("page_size", page_size.to_string()),
    ]
}

/// Percent-encode one path segment (`' '` becomes `%20`, never `+`).
fn encode_segment(id: &str) -> String {
    urlencoding::encode(id.trim()).into_owned()
}

/// Detail endpoints sometimes wrap the record in `data`.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut obj) if obj.len() == 1 && obj.get("data").is_some_and(Value::is_object) => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn with_default_id(body: Value, key: &str, id: &str) -> Value {
    match unwrap_data(body) {
        Value::Object(mut obj) => {
            obj.entry(key.to_string())
                .or_insert_with(|| Value::String(id.to_string()));
            Value::Object(obj)
        }
        other => other,
    }
}

async fn unauthorized(response: reqwest::Response) -> HubError {
    let body = response.text().await.unwrap_or_default();
    HubError::Auth {
        status_code: Some(401),
        reason: format!("remote rejected a freshly refreshed token: {}", body_excerpt(&body)),
    }
}

async fn decode(response: reqwest::Response, timeout: Duration) -> Result<Value> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(&e, timeout))?;

    if !status.is_success() {
        return Err(HubError::RemoteApi {
            status_code: status.as_u16(),
            body: body_excerpt(&body),
            retry_after,
        });
    }
    if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT || body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| {
        HubError::ParseResponse(format!("HTTP {}: {e}: {}", status.as_u16(), body_excerpt(&body)))
    })
}
