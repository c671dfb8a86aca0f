//! ProxyPipeline (`§4.4`): the `/v1/*` handler.

mod headers;
mod sse;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use lgw_domain::model::RequestLogEntry;
use lgw_domain::Error;
use serde_json::Value;

use crate::policy::PolicyEngine;
use crate::state::AppState;
use crate::{identity, usage};

pub use sse::UsageTrackingStream;

const DEFAULT_MODEL: &str = "unknown";

/// `ANY /v1/*rest`.
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started_at = Utc::now();
    let path = format!("/v1/{rest}");
    let config = state.config_snapshot();

    let Some(api_key) = config.openrouter_api_key().map(str::to_string) else {
        state
            .system_log
            .error("proxy request rejected: OPENROUTER_API_KEY is not configured");
        return finish(
            &state,
            None,
            DEFAULT_MODEL.to_string(),
            &path,
            &method,
            started_at,
            false,
            0.0,
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &Error::Config("OPENROUTER_API_KEY missing".into())),
        )
        .await;
    };

    // Fast path: model catalog bypasses identity, policy, and usage
    // entirely, but a RequestLog row is still produced.
    if method == Method::GET && (rest == "models" || rest.starts_with("models/")) {
        let resp = dispatch_raw(&state, &config, &api_key, &method, &rest, query.as_deref(), &headers, body).await;
        return finish(&state, None, DEFAULT_MODEL.to_string(), &path, &method, started_at, false, 0.0, resp).await;
    }

    let user_id = identity::resolve(&headers);
    if let Some(ref id) = user_id {
        match state.audit.ensure_user(id).await {
            Ok(user) => state.cache.put_user(user),
            Err(err) => state.system_log.warn(format!("ensure_user failed for {id}: {err}")),
        }
    }

    let is_write = !matches!(method, Method::GET | Method::HEAD);
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_json = content_type.contains("application/json");

    let mut json_body: Option<Value> = None;
    let mut model = DEFAULT_MODEL.to_string();

    if is_write && is_json && !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => {
                model = value
                    .get("model")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_MODEL)
                    .to_string();
                json_body = Some(value);
            }
            Err(err) => {
                state.system_log.warn(format!("proxy body JSON parse failed: {err}"));
            }
        }

        if let Some(ref id) = user_id {
            let engine = PolicyEngine {
                audit: &state.audit,
                webui: &state.webui,
                quota: &state.quota,
                cache: &state.cache,
                system_log: &state.system_log,
            };
            match engine.check_access(id, &model).await {
                Ok(decision) if !decision.allowed => {
                    let reason = decision.reason.unwrap_or_else(|| "access denied".to_string());
                    let body = serde_json::json!({ "error": reason });
                    let resp = (StatusCode::FORBIDDEN, axum::Json(body)).into_response();
                    return finish(&state, user_id, model, &path, &method, started_at, false, 0.0, resp).await;
                }
                Ok(_) => {}
                Err(err) => {
                    state.system_log.error(format!("check_access failed for {id}: {err}"));
                }
            }
        }
    }

    // Inject `user = <identifier>` as an authorization marker for upstream.
    let forward_body: Bytes = if let (Some(ref id), Some(Value::Object(mut map))) =
        (user_id.clone(), json_body.clone())
    {
        map.insert("user".to_string(), Value::String(id.clone()));
        match serde_json::to_vec(&Value::Object(map)) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => body.clone(),
        }
    } else {
        body.clone()
    };

    let (resp, is_stream, total_cost) = dispatch(
        &state,
        &config,
        &api_key,
        &method,
        &rest,
        query.as_deref(),
        &headers,
        forward_body,
        user_id.clone(),
        model.clone(),
        &path,
        started_at,
    )
    .await;

    finish(&state, user_id, model, &path, &method, started_at, is_stream, total_cost, resp).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AppState,
    config: &lgw_domain::config::RuntimeConfig,
    api_key: &str,
    method: &Method,
    rest: &str,
    query: Option<&str>,
    client_headers: &HeaderMap,
    body: Bytes,
    user_id: Option<String>,
    model_fallback: String,
    path: &str,
    started_at: chrono::DateTime<Utc>,
) -> (Response, bool, f64) {
    let url = build_upstream_url(&state.upstream_base, rest, query);
    let forward_headers = build_forward_headers(client_headers, api_key, config);

    let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            return (
                error_response(StatusCode::BAD_REQUEST, &Error::BadRequest("invalid method".into())),
                false,
                0.0,
            )
        }
    };

    let upstream = state
        .http
        .request(reqwest_method, &url)
        .headers(forward_headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(err) => {
            state.system_log.warn(format!("upstream dispatch failed: {err}"));
            return (
                error_response(StatusCode::BAD_GATEWAY, &Error::UpstreamUnavailable(err.to_string())),
                false,
                0.0,
            );
        }
    };

    let status = upstream.status();
    if status.is_client_error() || status.is_server_error() {
        state
            .system_log
            .warn(format!("upstream returned {status} for {method} {path}"));
    }

    let upstream_content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let return_headers = headers::clean_return_headers(&reqwest_headers_to_axum(upstream.headers()));
    let axum_status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    if upstream_content_type.contains("text/event-stream") {
        let stream = UsageTrackingStream::new(
            upstream,
            model_fallback,
            user_id,
            path.to_string(),
            method.to_string(),
            axum_status.as_u16() as i32,
            started_at,
            state.quota.clone(),
            Arc::clone(&state.system_log),
        );
        let mut builder = Response::builder().status(axum_status);
        *builder.headers_mut().unwrap() = return_headers;
        let resp = builder.body(Body::from_stream(stream)).unwrap_or_else(|_| {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &Error::Internal("stream response build failed".into()))
        });
        // The streaming path records its own RequestLog (with its own cost)
        // from `UsageTrackingStream::finalize`; the cost returned here is
        // unused by the caller.
        return (resp, true, 0.0);
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                error_response(StatusCode::BAD_GATEWAY, &Error::UpstreamUnavailable(err.to_string())),
                false,
                0.0,
            );
        }
    };

    let mut total_cost = 0.0;
    if let (Some(id), Ok(value)) = (user_id.as_ref(), serde_json::from_slice::<Value>(&bytes)) {
        if let Some(usage) = value.get("usage") {
            let model = value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&model_fallback)
                .to_string();
            total_cost = usage::extract_total_cost(usage);
            usage::record_usage(&state.quota, &state.system_log, id, &model, usage).await;
        }
    }

    let mut builder = Response::builder().status(axum_status);
    *builder.headers_mut().unwrap() = return_headers;
    let resp = builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, &Error::Internal("response build failed".into())));
    (resp, false, total_cost)
}

/// The `GET /v1/models` fast path — forwarded verbatim, no identity or
/// policy involvement.
async fn dispatch_raw(
    state: &AppState,
    config: &lgw_domain::config::RuntimeConfig,
    api_key: &str,
    method: &Method,
    rest: &str,
    query: Option<&str>,
    client_headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let url = build_upstream_url(&state.upstream_base, rest, query);
    let forward_headers = build_forward_headers(client_headers, api_key, config);
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);

    let upstream = state
        .http
        .request(reqwest_method, &url)
        .headers(forward_headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let return_headers = headers::clean_return_headers(&reqwest_headers_to_axum(resp.headers()));
            match resp.bytes().await {
                Ok(bytes) => {
                    let mut builder = Response::builder().status(status);
                    *builder.headers_mut().unwrap() = return_headers;
                    builder.body(Body::from(bytes)).unwrap_or_else(|_| {
                        error_response(StatusCode::INTERNAL_SERVER_ERROR, &Error::Internal("response build failed".into()))
                    })
                }
                Err(err) => error_response(StatusCode::BAD_GATEWAY, &Error::UpstreamUnavailable(err.to_string())),
            }
        }
        Err(err) => error_response(StatusCode::BAD_GATEWAY, &Error::UpstreamUnavailable(err.to_string())),
    }
}

fn build_upstream_url(base: &str, rest: &str, query: Option<&str>) -> String {
    let mut url = format!("{base}/v1/{rest}");
    if let Some(q) = query {
        if !q.is_empty() {
            url.push('?');
            url.push_str(q);
        }
    }
    url
}

fn build_forward_headers(
    client_headers: &HeaderMap,
    api_key: &str,
    config: &lgw_domain::config::RuntimeConfig,
) -> reqwest::header::HeaderMap {
    let cleaned = headers::clean_forward_headers(client_headers);
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in cleaned.iter() {
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(n, v);
        }
    }
    if let Ok(v) = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}")) {
        out.insert(reqwest::header::AUTHORIZATION, v);
    }
    if let Some(referer) = config.openrouter_http_referer() {
        if let Ok(v) = reqwest::header::HeaderValue::from_str(referer) {
            out.insert(reqwest::header::HeaderName::from_static("http-referer"), v);
        }
    }
    if let Some(title) = config.openrouter_x_title() {
        if let Ok(v) = reqwest::header::HeaderValue::from_str(title) {
            out.insert(reqwest::header::HeaderName::from_static("x-title"), v);
        }
    }
    if !out.contains_key(reqwest::header::USER_AGENT) {
        out.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("llm-quota-gateway"),
        );
    }
    out
}

fn reqwest_headers_to_axum(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if let (Ok(n), Ok(v)) = (
            axum::http::HeaderName::from_bytes(name.as_str().as_bytes()),
            axum::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(n, v);
        }
    }
    out
}

fn error_response(status: StatusCode, err: &Error) -> Response {
    let body = serde_json::json!({ "error": err.human_reason(), "code": err.code() });
    (status, axum::Json(body)).into_response()
}

/// Non-streaming tail: always records a `RequestLog` row, clamping latency
/// to `>= 0` (`§4.4` step 11). The streaming path records its own row from
/// `UsageTrackingStream::finalize` instead, since the body outlives this
/// function.
#[allow(clippy::too_many_arguments)]
async fn finish(
    state: &AppState,
    user_id: Option<String>,
    model: String,
    path: &str,
    method: &Method,
    started_at: chrono::DateTime<Utc>,
    is_stream: bool,
    total_cost: f64,
    response: Response,
) -> Response {
    if is_stream {
        return response;
    }
    let completed_at = Utc::now();
    let entry = RequestLogEntry {
        user_id,
        model,
        path: path.to_string(),
        method: method.to_string(),
        status: response.status().as_u16() as i32,
        is_stream: false,
        latency_ms: (completed_at - started_at).num_milliseconds().max(0),
        total_cost,
        started_at,
        completed_at,
    };
    usage::record_request_log(&state.quota, &state.system_log, &entry).await;
    response
}
