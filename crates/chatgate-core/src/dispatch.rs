use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use chatgate_common::{ExhaustionPolicy, GlobalConfig};
use chatgate_protocol::upstream::chat::{CreateChatPayload, CreateChatResponse, UpstreamContent};
use chatgate_provider_core::{
    BrowserError, BrowserMode, BrowserTab, Credential, CredentialPool, SessionHandle,
    SessionPool, UpstreamBody,
};
use chatgate_transform::{
    ChatTurn, Completion, TransformError, UpstreamStreamState, build_chat_payload,
    build_create_chat_payload, parse_upstream_body,
};

use crate::classify::{Attempt, DispatchResult, FatalKind, RecoverableKind, classify};
use crate::context::GatewayContext;
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub request_timeout: Duration,
    pub rate_limit_cooldown_hours: u64,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl DispatcherConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(global.request_timeout_secs),
            rate_limit_cooldown_hours: global.rate_limit_cooldown_hours,
            exhaustion_policy: global.exhaustion_policy,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(chatgate_common::DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_cooldown_hours: chatgate_common::DEFAULT_RATE_LIMIT_COOLDOWN_HOURS,
            exhaustion_policy: ExhaustionPolicy::Reject,
        }
    }
}

/// One user turn to deliver upstream. `model` is already resolved.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub content: UpstreamContent,
    pub model: String,
    pub chat_id: Option<String>,
    pub parent_id: Option<String>,
    pub files: Vec<JsonValue>,
    pub tools: Option<Vec<JsonValue>>,
    pub tool_choice: Option<JsonValue>,
}

impl SendRequest {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: UpstreamContent::Text(content.into()),
            model: model.into(),
            chat_id: None,
            parent_id: None,
            files: Vec::new(),
            tools: None,
            tool_choice: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub completion: Completion,
    /// Upstream session the turn was sent to (created when none was given).
    pub chat_id: String,
    /// Upstream reply id, used as `parentId` for the next turn.
    pub parent_id: Option<String>,
}

/// Bearer identity used for one attempt.
enum Identity {
    Credential(Credential),
    /// Token cached from the browser session; only used when no credentials
    /// are configured.
    Shared(String),
}

impl Identity {
    fn token(&self) -> &str {
        match self {
            Identity::Credential(credential) => &credential.token,
            Identity::Shared(token) => token,
        }
    }

    fn label(&self) -> &str {
        match self {
            Identity::Credential(credential) => &credential.id,
            Identity::Shared(_) => "shared",
        }
    }
}

/// Orchestrates one "send a message" call.
///
/// Retries are an explicit loop: every auth or rate-limit failure removes the
/// failing credential from the eligible set before the next attempt, and the
/// loop is capped at the pool size plus one.
pub struct Dispatcher {
    credentials: Arc<CredentialPool>,
    sessions: Arc<SessionPool>,
    context: Arc<GatewayContext>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<CredentialPool>,
        sessions: Arc<SessionPool>,
        context: Arc<GatewayContext>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            credentials,
            sessions,
            context,
            config,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    pub async fn send(&self, request: SendRequest) -> Result<DispatchOutcome, GatewayError> {
        // A freshly created chat gets its first message from the same identity.
        let (chat_id, mut pinned) = match request.chat_id.clone().filter(|id| !id.trim().is_empty())
        {
            Some(chat_id) => (chat_id, None),
            None => {
                let (chat_id, identity) = self.ensure_session(&request.model).await?;
                (chat_id, Some(identity))
            }
        };
        let turn = ChatTurn {
            content: request.content,
            model: request.model,
            chat_id: chat_id.clone(),
            parent_id: request.parent_id,
            files: request.files,
            tools: request.tools,
            tool_choice: request.tool_choice,
        };

        let max_attempts = self.credentials.len().await + 1;
        let mut last_detail = String::from("no attempt made");
        for attempt_no in 1..=max_attempts {
            let (identity, handle) = self.acquire(pinned.take()).await?;
            debug!(
                event = "dispatch_attempt",
                attempt = attempt_no,
                credential_id = %identity.label(),
                session_id = handle.id(),
                chat_id = %chat_id
            );

            if let Err(err) = self.challenge_check(handle.tab()).await {
                handle.close().await;
                return Err(GatewayError::UpstreamOther(err.to_string()));
            }

            let started = Instant::now();
            let attempt = self.execute(handle.tab(), identity.token(), &turn).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if matches!(attempt, Attempt::Transport(_)) {
                handle.close().await;
            } else {
                self.sessions.release(handle).await;
            }

            match classify(attempt, self.config.rate_limit_cooldown_hours) {
                DispatchResult::Success(completion) => {
                    self.context.set_authenticated(true);
                    info!(
                        event = "dispatch_success",
                        credential_id = %identity.label(),
                        chat_id = %chat_id,
                        elapsed_ms,
                        content_chars = completion.content.chars().count()
                    );
                    let parent_id = completion.response_id.clone();
                    return Ok(DispatchOutcome {
                        completion,
                        chat_id,
                        parent_id,
                    });
                }
                DispatchResult::Fatal {
                    kind: FatalKind::VerificationRequired,
                    detail,
                } => {
                    warn!(
                        event = "dispatch_verification",
                        credential_id = %identity.label(),
                        elapsed_ms,
                        "upstream verification page detected"
                    );
                    self.enter_verification().await;
                    return Err(GatewayError::VerificationRequired(format!(
                        "{detail}; complete the verification in the browser window"
                    )));
                }
                DispatchResult::Fatal {
                    kind: FatalKind::UpstreamOther,
                    detail,
                } => {
                    warn!(
                        event = "dispatch_failed",
                        credential_id = %identity.label(),
                        elapsed_ms,
                        detail = %detail
                    );
                    return Err(GatewayError::UpstreamOther(detail));
                }
                DispatchResult::Recoverable { kind, detail } => {
                    warn!(
                        event = "dispatch_recoverable",
                        credential_id = %identity.label(),
                        kind = ?kind,
                        elapsed_ms,
                        detail = %detail
                    );
                    let credential = match identity {
                        Identity::Credential(credential) => {
                            self.context.shared_token().clear();
                            credential
                        }
                        Identity::Shared(_) => {
                            self.context.discard_shared_token().await;
                            return Err(match kind {
                                RecoverableKind::AuthExpired => GatewayError::AuthExpired(detail),
                                RecoverableKind::RateLimited { .. } => {
                                    GatewayError::RateLimited(detail)
                                }
                            });
                        }
                    };
                    let marked = match kind {
                        RecoverableKind::AuthExpired => {
                            self.credentials.mark_invalid(&credential.id).await
                        }
                        RecoverableKind::RateLimited { hours } => {
                            self.credentials
                                .mark_rate_limited(&credential.id, hours)
                                .await
                        }
                    };
                    if let Err(err) = marked {
                        warn!(
                            event = "credential_persist_failed",
                            credential_id = %credential.id,
                            error = %err
                        );
                    }
                    if !self.credentials.has_eligible().await {
                        return Err(self.exhausted(detail).await);
                    }
                    last_detail = detail;
                }
            }
        }

        Err(self.exhausted(last_detail).await)
    }

    /// Creates an upstream chat session. Any failure aborts the call; it is
    /// not retried so a half-completed creation cannot spawn duplicates.
    async fn ensure_session(&self, model: &str) -> Result<(String, Identity), GatewayError> {
        let (identity, handle) = self.acquire(None).await?;
        let payload = build_create_chat_payload(model);
        let result = tokio::time::timeout(
            self.config.request_timeout,
            create_chat(handle.tab(), identity.token(), &payload),
        )
        .await
        .unwrap_or(Err(CreateChatError::Transport(BrowserError::Timeout)));

        match result {
            Ok(chat_id) => {
                self.sessions.release(handle).await;
                info!(
                    event = "chat_session_created",
                    credential_id = %identity.label(),
                    chat_id = %chat_id
                );
                Ok((chat_id, identity))
            }
            Err(CreateChatError::Rejected(detail)) => {
                self.sessions.release(handle).await;
                warn!(event = "chat_session_failed", credential_id = %identity.label(), detail = %detail);
                Err(GatewayError::UpstreamOther(format!(
                    "failed to create upstream chat: {detail}"
                )))
            }
            Err(CreateChatError::Transport(err)) => {
                handle.close().await;
                warn!(event = "chat_session_failed", credential_id = %identity.label(), error = %err);
                Err(GatewayError::UpstreamOther(format!(
                    "failed to create upstream chat: {err}"
                )))
            }
        }
    }

    /// `pinned` skips credential selection for this attempt.
    async fn acquire(
        &self,
        pinned: Option<Identity>,
    ) -> Result<(Identity, SessionHandle), GatewayError> {
        let selected = match pinned {
            Some(identity) => Some(identity),
            None => match self.credentials.acquire().await {
                Some(credential) => Some(Identity::Credential(credential)),
                None if self.credentials.is_empty().await => None,
                None => {
                    return Err(self.exhausted("no eligible credential".to_string()).await);
                }
            },
        };

        let handle = self
            .sessions
            .acquire(self.context.shared_token())
            .await
            .map_err(|err| GatewayError::UpstreamOther(format!("open upstream session: {err}")))?;

        let identity = match selected {
            Some(identity) => identity,
            None => match self.context.shared_token().get() {
                Some(token) => Identity::Shared(token),
                None => {
                    self.sessions.release(handle).await;
                    return Err(GatewayError::AuthExpired(
                        "no credentials configured and the browser session has no token"
                            .to_string(),
                    ));
                }
            },
        };
        Ok((identity, handle))
    }

    async fn challenge_check(&self, tab: &dyn BrowserTab) -> Result<(), BrowserError> {
        if tab.shows_challenge().await? {
            info!(event = "challenge_reload", "challenge page visible, reloading");
            tokio::time::timeout(self.config.request_timeout, tab.reload())
                .await
                .unwrap_or(Err(BrowserError::Timeout))?;
        }
        Ok(())
    }

    async fn execute(&self, tab: &dyn BrowserTab, token: &str, turn: &ChatTurn) -> Attempt {
        let payload = build_chat_payload(turn);
        let work = async {
            let reply = match tab.send_message(token, &turn.chat_id, &payload).await {
                Ok(reply) => reply,
                Err(err) => return Attempt::Transport(err),
            };
            let status = reply.status;
            if !reply.is_success() {
                return match reply.body.collect().await {
                    Ok(body) => Attempt::Rejected {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    },
                    Err(err) => Attempt::Transport(err),
                };
            }
            match reply.body {
                UpstreamBody::Bytes(bytes) => {
                    parsed_attempt(status, parse_upstream_body(&bytes, &turn.model))
                }
                UpstreamBody::Stream(mut rx) => {
                    let mut state = UpstreamStreamState::new();
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            Ok(chunk) => {
                                if state.push_bytes(&chunk) {
                                    break;
                                }
                            }
                            Err(err) => return Attempt::Transport(err),
                        }
                    }
                    parsed_attempt(status, state.finish(&turn.model))
                }
            }
        };
        tokio::time::timeout(self.config.request_timeout, work)
            .await
            .unwrap_or(Attempt::Transport(BrowserError::Timeout))
    }

    async fn enter_verification(&self) {
        self.context.set_authenticated(false);
        self.sessions.clear().await;
        self.context.discard_shared_token().await;
        if let Err(err) = self
            .sessions
            .browser()
            .restart(BrowserMode::Interactive)
            .await
        {
            warn!(event = "browser_restart_failed", mode = "interactive", error = %err);
        }
    }

    async fn exhausted(&self, detail: String) -> GatewayError {
        warn!(
            event = "credentials_exhausted",
            policy = %self.config.exhaustion_policy,
            detail = %detail
        );
        if self.config.exhaustion_policy == ExhaustionPolicy::Shutdown {
            self.sessions.clear().await;
            self.context.request_shutdown("no eligible credential left");
        }
        GatewayError::CredentialsExhausted(format!(
            "no eligible upstream credential left; last failure: {detail}"
        ))
    }
}

/// A 2xx body without a completion is judged like a rejection.
fn parsed_attempt(status: u16, parsed: Result<Completion, TransformError>) -> Attempt {
    match parsed {
        Ok(completion) => Attempt::Completed(completion),
        Err(TransformError::UnexpectedDocument(body)) => Attempt::Rejected { status, body },
        Err(err) => Attempt::Rejected {
            status,
            body: err.to_string(),
        },
    }
}

enum CreateChatError {
    Rejected(String),
    Transport(BrowserError),
}

async fn create_chat(
    tab: &dyn BrowserTab,
    token: &str,
    payload: &CreateChatPayload,
) -> Result<String, CreateChatError> {
    let reply = tab
        .create_chat(token, payload)
        .await
        .map_err(CreateChatError::Transport)?;
    let status = reply.status;
    let body = reply
        .body
        .collect()
        .await
        .map_err(CreateChatError::Transport)?;
    if !(200..300).contains(&status) {
        return Err(CreateChatError::Rejected(format!(
            "status {status}: {}",
            String::from_utf8_lossy(&body)
        )));
    }
    serde_json::from_slice::<CreateChatResponse>(&body)
        .ok()
        .and_then(|response| response.chat_id().map(str::to_string))
        .ok_or_else(|| CreateChatError::Rejected(String::from_utf8_lossy(&body).into_owned()))
}
