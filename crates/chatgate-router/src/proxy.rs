use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use chatgate_common::GlobalConfig;
use chatgate_core::{
    CredentialStatus, DispatchOutcome, Dispatcher, GatewayError, SendRequest, probe_credentials,
};
use chatgate_protocol::gateway::{
    ERROR_TYPE_AUTHENTICATION, ErrorBody, SimpleChatRequestBody, WithSession,
};
use chatgate_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use chatgate_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use chatgate_protocol::openai::create_chat_completions::types::{
    ChatCompletionMessageContent, ChatCompletionRequestMessage, ChatCompletionRole,
};
use chatgate_protocol::upstream::chat::{UpstreamContent, UpstreamContentPart};
use chatgate_transform::{completion_frames, error_frames, upstream_content};

use crate::models::ModelTable;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Accepted downstream keys; empty disables the check.
    pub api_keys: Vec<String>,
    pub stream_chunk_size: usize,
    pub stream_chunk_delay: Duration,
}

impl ProxySettings {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            api_keys: global.api_keys.clone(),
            stream_chunk_size: global.stream_chunk_size,
            stream_chunk_delay: Duration::from_millis(global.stream_chunk_delay_ms),
        }
    }
}

#[derive(Clone)]
pub struct ProxyState {
    pub dispatcher: Arc<Dispatcher>,
    pub models: Arc<ModelTable>,
    pub settings: Arc<ProxySettings>,
}

pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/chat", post(simple_chat))
        .route("/models", get(list_models))
        .route("/status", get(status))
        .layer(middleware::from_fn_with_state(state.clone(), proxy_auth))
        .with_state(state)
}

async fn proxy_auth(
    State(state): State<ProxyState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    if !state.settings.api_keys.is_empty() {
        let authorized = extract_bearer(req.headers())
            .is_some_and(|key| state.settings.api_keys.iter().any(|known| *known == key));
        if !authorized {
            warn!(
                event = "downstream_unauthorized",
                trace_id = %trace_id,
                method = %method,
                path = %path
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new(
                    "missing or unknown API key",
                    ERROR_TYPE_AUTHENTICATION,
                )),
            )
                .into_response();
        }
    }

    let started = Instant::now();
    let resp = next.run(req).await;
    info!(
        event = "downstream_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    resp
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if value.len() <= prefix.len() || !value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    let token = value[prefix.len()..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn chat_completions(State(state): State<ProxyState>, body: Bytes) -> Response {
    let body: CreateChatCompletionRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return error_response(&GatewayError::Validation(format!(
                "invalid request body: {err}"
            )));
        }
    };
    let stream = body.is_stream();
    let request = match completion_request(&state.models, body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let model = request.model.clone();

    match state.dispatcher.send(request).await {
        Ok(outcome) if stream => {
            let frames = completion_frames(&outcome.completion, state.settings.stream_chunk_size);
            sse_response(frames, state.settings.stream_chunk_delay, Some(&outcome))
        }
        Ok(outcome) => Json(with_session(outcome)).into_response(),
        Err(err) if stream => {
            warn!(event = "chat_failed", stream = true, model = %model, error = %err);
            let mut resp = sse_response(error_frames(err.message(), &model), Duration::ZERO, None);
            if matches!(err, GatewayError::VerificationRequired(_)) {
                resp.headers_mut()
                    .insert(VERIFICATION_HEADER, HeaderValue::from_static("true"));
            }
            resp
        }
        Err(err) => {
            warn!(event = "chat_failed", stream = false, model = %model, error = %err);
            error_response(&err)
        }
    }
}

async fn simple_chat(State(state): State<ProxyState>, body: Bytes) -> Response {
    let body: SimpleChatRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return error_response(&GatewayError::Validation(format!(
                "invalid request body: {err}"
            )));
        }
    };
    let request = match simple_request(&state.models, body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let model = request.model.clone();

    match state.dispatcher.send(request).await {
        Ok(outcome) => Json(with_session(outcome)).into_response(),
        Err(err) => {
            warn!(event = "chat_failed", stream = false, model = %model, error = %err);
            error_response(&err)
        }
    }
}

async fn list_models(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(state.models.list())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    authenticated: bool,
    shared_token: bool,
    credentials: Vec<CredentialStatus>,
}

async fn status(State(state): State<ProxyState>) -> impl IntoResponse {
    let dispatcher = &state.dispatcher;
    let credentials = probe_credentials(
        dispatcher.credentials(),
        dispatcher.sessions().browser().as_ref(),
    )
    .await;
    Json(StatusResponse {
        authenticated: dispatcher.context().is_authenticated(),
        shared_token: dispatcher.context().shared_token().is_set(),
        credentials,
    })
}

fn completion_request(
    models: &ModelTable,
    body: CreateChatCompletionRequestBody,
) -> Result<SendRequest, GatewayError> {
    if body.messages.is_empty() {
        return Err(GatewayError::Validation(
            "messages must not be empty".to_string(),
        ));
    }
    let content = last_user_content(&body.messages)?;
    let mut content = to_upstream(content)?;

    let chat_id = body.chat_id.filter(|id| !id.trim().is_empty());
    // A continued upstream session already carries its system prompt.
    if chat_id.is_none() {
        let system = system_prompt(&body.messages);
        if !system.is_empty() {
            content = with_system_prompt(content, &system);
        }
    }

    let tools = body.tools.filter(|tools| !tools.is_empty()).or_else(|| {
        body.functions
            .filter(|functions| !functions.is_empty())
            .map(|functions| {
                functions
                    .into_iter()
                    .map(|function| json!({ "type": "function", "function": function }))
                    .collect::<Vec<JsonValue>>()
            })
    });

    Ok(SendRequest {
        content,
        model: models.resolve(&body.model),
        chat_id,
        parent_id: body.parent_id,
        files: body.files,
        tools,
        tool_choice: body.tool_choice,
    })
}

fn simple_request(
    models: &ModelTable,
    body: SimpleChatRequestBody,
) -> Result<SendRequest, GatewayError> {
    let Some(message) = body.message else {
        let Some(messages) = body.messages else {
            return Err(GatewayError::Validation("message is required".to_string()));
        };
        return completion_request(
            models,
            CreateChatCompletionRequestBody {
                messages,
                model: body.model.unwrap_or_default(),
                stream: None,
                tools: None,
                functions: None,
                tool_choice: None,
                files: body.files,
                chat_id: body.chat_id,
                parent_id: body.parent_id,
            },
        );
    };
    if message.is_blank() {
        return Err(GatewayError::Validation("message is required".to_string()));
    }

    Ok(SendRequest {
        content: to_upstream(&message)?,
        model: models.resolve(body.model.as_deref().unwrap_or_default()),
        chat_id: body.chat_id.filter(|id| !id.trim().is_empty()),
        parent_id: body.parent_id,
        files: body.files,
        tools: None,
        tool_choice: None,
    })
}

fn last_user_content(
    messages: &[ChatCompletionRequestMessage],
) -> Result<&ChatCompletionMessageContent, GatewayError> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == ChatCompletionRole::User)
        .ok_or_else(|| GatewayError::Validation("no user message found".to_string()))?
        .content
        .as_ref()
        .filter(|content| !content.is_blank())
        .ok_or_else(|| GatewayError::Validation("user message has no content".to_string()))
}

fn to_upstream(content: &ChatCompletionMessageContent) -> Result<UpstreamContent, GatewayError> {
    upstream_content(content).map_err(|err| GatewayError::Validation(err.to_string()))
}

fn system_prompt(messages: &[ChatCompletionRequestMessage]) -> String {
    messages
        .iter()
        .filter(|message| {
            matches!(
                message.role,
                ChatCompletionRole::System | ChatCompletionRole::Developer
            )
        })
        .filter_map(|message| message.content.as_ref().map(|content| content.text()))
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn with_system_prompt(content: UpstreamContent, system: &str) -> UpstreamContent {
    match content {
        UpstreamContent::Text(text) => UpstreamContent::Text(format!("{system}\n\n{text}")),
        UpstreamContent::Parts(mut parts) => {
            parts.insert(
                0,
                UpstreamContentPart::Text {
                    text: system.to_string(),
                },
            );
            UpstreamContent::Parts(parts)
        }
    }
}

fn with_session(outcome: DispatchOutcome) -> WithSession<CreateChatCompletionResponse> {
    WithSession {
        inner: outcome.completion.to_response(),
        chat_id: outcome.chat_id,
        parent_id: outcome.parent_id,
    }
}

fn error_response(err: &GatewayError) -> Response {
    (err.status_code(), Json(err.to_body())).into_response()
}

// Session linkage travels in headers on the streaming path.
const CHAT_ID_HEADER: &str = "x-chat-id";
const PARENT_ID_HEADER: &str = "x-parent-id";
/// Set on a streamed error when a human has to clear the upstream challenge.
const VERIFICATION_HEADER: &str = "x-verification";

/// Sends pre-rendered frames with `delay` between them. The stream always
/// ends with whatever terminal frame `frames` carries.
fn sse_response(frames: Vec<Bytes>, delay: Duration, outcome: Option<&DispatchOutcome>) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let last = frames.len().saturating_sub(1);
        for (index, frame) in frames.into_iter().enumerate() {
            if tx.send(frame).await.is_err() {
                debug!(event = "downstream_stream_closed", sent = index);
                return;
            }
            if index < last && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no");
    if let Some(outcome) = outcome
        && let Some(headers) = builder.headers_mut()
    {
        if let Ok(value) = HeaderValue::from_str(&outcome.chat_id) {
            headers.insert(CHAT_ID_HEADER, value);
        }
        if let Some(parent_id) = outcome.parent_id.as_deref()
            && let Ok(value) = HeaderValue::from_str(parent_id)
        {
            headers.insert(PARENT_ID_HEADER, value);
        }
    }

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    builder.body(Body::from_stream(stream)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}
