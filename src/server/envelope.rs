//! JSON response envelope: `{ok, data?, error?, code?}`.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::HubError;

pub type Body = Full<Bytes>;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// 200 with `data`.
pub fn ok<T: Serialize>(data: T) -> Response<Body> {
    respond(
        StatusCode::OK,
        &Envelope {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        },
    )
}

/// A failure with an explicit status and code.
pub fn failure(status: StatusCode, code: &str, error: impl std::fmt::Display) -> Response<Body> {
    respond(
        status,
        &Envelope::<()> {
            ok: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(code.to_string()),
        },
    )
}

/// A core failure: always 500, message text only.
pub fn core_failure(code: &str, err: &HubError) -> Response<Body> {
    tracing::warn!(code, error_code = err.error_code(), error = %err, "Admin request failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, code, err)
}

pub fn invalid_request(error: impl std::fmt::Display) -> Response<Body> {
    failure(StatusCode::BAD_REQUEST, "invalid_request", error)
}

fn respond<T: Serialize>(status: StatusCode, envelope: &Envelope<T>) -> Response<Body> {
    let (status, body) = match serde_json::to_vec(envelope) {
        Ok(body) => (status, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(r#"{{"ok":false,"error":"serialization failed: {e}","code":"internal_error"}}"#)
                .into_bytes(),
        ),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ok_envelope_omits_error_fields() {
        let json = body_json(ok(serde_json::json!({"n": 1}))).await;
        assert_eq!(json, serde_json::json!({"ok": true, "data": {"n": 1}}));
    }

    #[tokio::test]
    async fn core_failure_is_500_with_code_and_message() {
        let response = core_failure("sale_fetch_failed", &HubError::remote(503, "down"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["code"], "sale_fetch_failed");
        assert_eq!(json["error"], "remote API returned HTTP 503: down");
        assert!(json.get("data").is_none());
    }
}
