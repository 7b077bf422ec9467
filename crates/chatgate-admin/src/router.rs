use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use chatgate_common::GlobalConfig;
use chatgate_core::Dispatcher;
use chatgate_provider_core::{BrowserMode, ProviderError};

#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub global: Arc<GlobalConfig>,
    pub admin_key: Arc<str>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/global", get(get_global))
        .route("/credentials", get(list_credentials).post(add_credential))
        .route("/credentials/reload", post(reload_credentials))
        .route("/credentials/{id}/valid", post(mark_valid))
        .route("/credentials/{id}", delete(delete_credential))
        .route("/session/restart", post(restart_session))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = extract_admin_key(&headers, req.uri()).ok_or(StatusCode::UNAUTHORIZED)?;
    if key != *state.admin_key {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = uri.query()?;
    let parsed: std::collections::HashMap<String, String> =
        serde_urlencoded::from_str(query).ok()?;
    let key = parsed.get("admin_key")?.trim();
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let context = state.dispatcher.context();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "ok": true,
            "authenticated": context.is_authenticated(),
            "shutdown_requested": context.shutdown_requested(),
        })),
    )
}

async fn get_global(State(state): State<AdminState>) -> impl IntoResponse {
    let global = &state.global;
    Json(serde_json::json!({
        "host": global.host,
        "port": global.port,
        "data_dir": global.data_dir,
        "upstream_base_url": global.upstream_base_url,
        "proxy": global.proxy,
        "session_pool_capacity": global.session_pool_capacity,
        "request_timeout_secs": global.request_timeout_secs,
        "default_model": global.default_model,
        "rate_limit_cooldown_hours": global.rate_limit_cooldown_hours,
        "stream_chunk_size": global.stream_chunk_size,
        "stream_chunk_delay_ms": global.stream_chunk_delay_ms,
        "exhaustion_policy": global.exhaustion_policy,
        "api_keys": global.api_keys.len(),
    }))
}

async fn list_credentials(State(state): State<AdminState>) -> impl IntoResponse {
    let credentials = state.dispatcher.credentials().views().await;
    Json(serde_json::json!({ "credentials": credentials }))
}

#[derive(Debug, Deserialize)]
struct AddCredentialBody {
    token: String,
}

async fn add_credential(
    State(state): State<AdminState>,
    Json(body): Json<AddCredentialBody>,
) -> Response {
    let token = body.token.trim();
    if token.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "token_required");
    }
    match state.dispatcher.credentials().insert(token).await {
        Ok(credential) => {
            info!(event = "credential_added", credential_id = %credential.id);
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "credential": credential.view(OffsetDateTime::now_utc())
                })),
            )
                .into_response()
        }
        Err(err) => provider_error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct MarkValidBody {
    #[serde(default)]
    token: Option<String>,
}

async fn mark_valid(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        MarkValidBody::default()
    } else {
        match serde_json::from_slice::<MarkValidBody>(&body) {
            Ok(body) => body,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_body"),
        }
    };
    let token = body
        .token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    let replaced = token.is_some();
    match state.dispatcher.credentials().mark_valid(&id, token).await {
        Ok(true) => {
            info!(event = "credential_revalidated", credential_id = %id, token_replaced = replaced);
            (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "credential_not_found"),
        Err(err) => provider_error_response(err),
    }
}

async fn delete_credential(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.dispatcher.credentials().remove(&id).await {
        Ok(true) => {
            info!(event = "credential_deleted", credential_id = %id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "credential_not_found"),
        Err(err) => provider_error_response(err),
    }
}

async fn reload_credentials(State(state): State<AdminState>) -> Response {
    match state.dispatcher.credentials().reload().await {
        Ok(count) => {
            info!(event = "credentials_reloaded", count);
            (StatusCode::OK, Json(serde_json::json!({ "count": count }))).into_response()
        }
        Err(err) => provider_error_response(err),
    }
}

/// Drops every pooled handle and brings the browser back headless, for use
/// once a human has cleared a verification challenge.
async fn restart_session(State(state): State<AdminState>) -> Response {
    let sessions = state.dispatcher.sessions();
    let context = state.dispatcher.context();
    sessions.clear().await;
    context.shared_token().clear();
    match sessions.browser().restart(BrowserMode::Headless).await {
        Ok(()) => {
            context.set_authenticated(true);
            info!(event = "browser_restarted", mode = "headless");
            (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
        }
        Err(err) => {
            warn!(event = "browser_restart_failed", mode = "headless", error = %err);
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(serde_json::json!({ "error": code }))).into_response()
}

fn provider_error_response(err: ProviderError) -> Response {
    warn!(event = "admin_action_failed", error = %err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
