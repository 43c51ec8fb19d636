//! Token Manager for the Kiwify OAuth client-credentials flow.
//!
//! The manager owns the only copy of the bearer token. Callers get the secret
//! through [`TokenManager::access_token`] and can inspect
//! [`TokenManager::metadata`] without ever touching the network.
//!
//! Concurrent refreshes coalesce: a single async gate serializes refreshes and
//! a generation counter lets callers that queued behind an in-flight refresh
//! reuse its result.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::clock::Clock;
use crate::core::http::{body_excerpt, resolve_token_urls, transport_error};
use crate::core::retry::{RetryPolicy, classify, retry_with_backoff};
use crate::error::{HubError, Result};

/// Default safety margin before `expires_at` after which a token is stale.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// A bearer token as cached by the manager.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub obtained_at: DateTime<Utc>,
    pub account_id: Option<String>,
}

impl AccessToken {
    /// The secret itself.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("obtained_at", &self.obtained_at)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Externally visible token state. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenMetadata {
    pub has_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub obtained_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
}

/// What a token endpoint hands back.
#[derive(Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub account_id: Option<String>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Seam for the remote auth endpoint.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    async fn request_token(&self) -> Result<IssuedToken>;
}

/// Refresh behaviour.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub expiry_margin: Duration,
    pub refresh: RetryPolicy,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            refresh: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct TokenState {
    token: Option<Arc<AccessToken>>,
    generation: u64,
}

/// Obtains, caches and refreshes the remote access token.
pub struct TokenManager {
    transport: Arc<dyn TokenTransport>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
    state: RwLock<TokenState>,
    refresh_gate: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            settings,
            state: RwLock::new(TokenState::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Return the bearer secret, refreshing when stale or when forced.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Auth`] when the credentials are rejected or the
    /// auth endpoint stays unreachable after the refresh budget.
    pub async fn access_token(&self, force_refresh: bool) -> Result<String> {
        let token = self.token(force_refresh).await?;
        Ok(token.secret().to_string())
    }

    /// Like [`Self::access_token`] but returns the whole cached entry.
    ///
    /// # Errors
    ///
    /// Same as [`Self::access_token`].
    pub async fn token(&self, force_refresh: bool) -> Result<Arc<AccessToken>> {
        let (cached, seen_generation) = self.snapshot();
        if !force_refresh
            && let Some(token) = cached
            && self.is_fresh(&token)
        {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;

        // A refresh completed while this caller waited: share it, fresh or not.
        let (cached, generation) = self.snapshot();
        if let Some(token) = cached
            && (generation != seen_generation || (!force_refresh && self.is_fresh(&token)))
        {
            tracing::debug!(generation, "Reusing token from concurrent refresh");
            return Ok(token);
        }

        let issued = self.refresh().await?;
        let now = self.clock.now();
        let token = Arc::new(AccessToken {
            value: issued.access_token,
            token_type: issued.token_type,
            expires_at: now + TimeDelta::seconds(issued.expires_in.max(0)),
            obtained_at: now,
            account_id: issued.account_id,
        });

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.token = Some(token.clone());
        state.generation += 1;
        tracing::info!(
            generation = state.generation,
            expires_at = %token.expires_at,
            "Access token refreshed"
        );
        Ok(token)
    }

    /// Cached token state. Never awaits and never calls the auth endpoint.
    #[must_use]
    pub fn metadata(&self) -> AccessTokenMetadata {
        let (cached, _) = self.snapshot();
        AccessTokenMetadata {
            has_token: cached.is_some(),
            expires_at: cached.as_ref().map(|t| t.expires_at),
            obtained_at: cached.as_ref().map(|t| t.obtained_at),
            token_type: cached.map(|t| t.token_type.clone()),
        }
    }

    /// Drop the cached token so the next call refreshes.
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.token = None;
    }

    fn snapshot(&self) -> (Option<Arc<AccessToken>>, u64) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.token.clone(), state.generation)
    }

    /// Usable while `now + margin < expires_at`. The margin is capped at half
    /// the token's lifetime so short-lived tokens are still reused.
    fn is_fresh(&self, token: &AccessToken) -> bool {
        let configured = TimeDelta::from_std(self.settings.expiry_margin).unwrap_or(TimeDelta::MAX);
        let lifetime = token.expires_at - token.obtained_at;
        let margin = configured.min(lifetime / 2);
        self.clock
            .now()
            .checked_add_signed(margin)
            .is_some_and(|deadline| deadline < token.expires_at)
    }

    async fn refresh(&self) -> Result<IssuedToken> {
        let transport = self.transport.clone();
        retry_with_backoff(&self.settings.refresh, classify, |attempt| {
            let transport = transport.clone();
            async move {
                tracing::debug!(attempt, "Requesting access token");
                transport.request_token().await
            }
        })
        .await
        .map_err(|e| match e {
            HubError::Auth { .. } | HubError::AuthNotConfigured(_) => e,
            other => HubError::Auth {
                status_code: other.status_code(),
                reason: other.to_string(),
            },
        })
    }
}

// =============================================================================
// OAuth client-credentials transport
// =============================================================================

/// Client credentials for the token endpoint.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub audience: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    account_id: Option<Value>,
    account: Option<Value>,
    user: Option<Value>,
}

/// Posts `grant_type=client_credentials` to `<base>/oauth/token`, falling back
/// to `<base>/v1/oauth/token` when the root endpoint answers 404.
pub struct OAuthTransport {
    client: Client,
    base_url: String,
    credentials: ClientCredentials,
    timeout: Duration,
}

impl OAuthTransport {
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        credentials: ClientCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            credentials,
            timeout,
        }
    }

    fn form_body(&self) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret);
        if let Some(scope) = &self.credentials.scope {
            form.append_pair("scope", scope);
        }
        if let Some(audience) = &self.credentials.audience {
            form.append_pair("audience", audience);
        }
        form.finish()
    }

    async fn post(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(self.form_body())
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))
    }
}

#[async_trait]
impl TokenTransport for OAuthTransport {
    async fn request_token(&self) -> Result<IssuedToken> {
        let (root, fallback) = resolve_token_urls(&self.base_url);
        let mut response = self.post(&root).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND
            && let Some(fallback) = fallback
        {
            tracing::debug!(url = %fallback, "Root token endpoint missing, trying versioned path");
            response = self.post(&fallback).await?;
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        if !status.is_success() {
            let code = status.as_u16();
            if status.is_client_error() && code != 429 {
                return Err(HubError::Auth {
                    status_code: Some(code),
                    reason: body_excerpt(&body),
                });
            }
            return Err(HubError::remote(code, body_excerpt(&body)));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| HubError::ParseResponse(format!("token response: {e}")))?;
        let access_token = parsed
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HubError::Auth {
                status_code: Some(status.as_u16()),
                reason: "token response carried no access_token".to_string(),
            })?
            .to_string();

        let account_id = account_id_from_response(&parsed).or_else(|| account_id_from_jwt(&access_token));

        Ok(IssuedToken {
            token_type: parsed
                .token_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in: parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            access_token,
            account_id,
        })
    }
}

/// Accept a string, a number, or an object carrying `id`/`account_id`.
fn resolve_account_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("account_id"))
            .and_then(resolve_account_id),
        _ => None,
    }
}

fn account_id_from_claims(claims: &Value) -> Option<String> {
    let user = claims.get("user");
    [
        claims.get("account_id"),
        claims.get("account"),
        user.and_then(|u| u.get("account_id")),
        user.and_then(|u| u.get("account")),
    ]
    .into_iter()
    .flatten()
    .find_map(resolve_account_id)
}

fn account_id_from_response(response: &TokenResponse) -> Option<String> {
    let user = response.user.as_ref();
    [
        response.account_id.as_ref(),
        response.account.as_ref(),
        user.and_then(|u| u.get("account_id")),
        user.and_then(|u| u.get("account")),
    ]
    .into_iter()
    .flatten()
    .find_map(resolve_account_id)
}

/// Read the account id from an unverified JWT payload.
fn account_id_from_jwt(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    account_id_from_claims(&claims)
}
