use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatgate_common::ExhaustionPolicy;
use chatgate_core::{Dispatcher, DispatcherConfig, GatewayContext, GatewayError, SendRequest};
use chatgate_protocol::upstream::chat::{CreateChatPayload, UpstreamChatPayload};
use chatgate_provider_core::{
    BodyChunk, BrowserError, BrowserMode, BrowserTab, Credential, CredentialPool,
    MemoryCredentialStore, ProbeStatus, SessionPool, UpstreamBody, UpstreamBrowser, UpstreamReply,
};
use chatgate_storage::SharedTokenFile;
use chatgate_transform::completion_frames;
use time::OffsetDateTime;
use tokio::sync::mpsc;

const HELLO_DOC: &str =
    r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}],"usage":{}}"#;

enum Scripted {
    Body(u16, String),
    Stream(Vec<&'static str>),
    /// Delivers the chunks, then fails the read.
    Broken(Vec<&'static str>, BrowserError),
    Fail(BrowserError),
}

#[derive(Default)]
struct StubState {
    replies: Mutex<VecDeque<Scripted>>,
    create_reply: Mutex<Option<(u16, String)>>,
    send_tokens: Mutex<Vec<String>>,
    create_tokens: Mutex<Vec<String>>,
    create_calls: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    reloads: AtomicUsize,
    restarts: Mutex<Vec<BrowserMode>>,
    challenge: AtomicBool,
    page_token: Mutex<Option<String>>,
}

impl StubState {
    fn script(&self, reply: Scripted) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn sends(&self) -> Vec<String> {
        self.send_tokens.lock().unwrap().clone()
    }
}

struct StubBrowser(Arc<StubState>);

struct StubTab(Arc<StubState>);

#[async_trait]
impl UpstreamBrowser for StubBrowser {
    async fn open_tab(&self) -> Result<Box<dyn BrowserTab>, BrowserError> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubTab(self.0.clone())))
    }

    async fn restart(&self, mode: BrowserMode) -> Result<(), BrowserError> {
        self.0.restarts.lock().unwrap().push(mode);
        Ok(())
    }

    async fn probe_token(&self, _token: &str) -> ProbeStatus {
        ProbeStatus::Ok
    }
}

#[async_trait]
impl BrowserTab for StubTab {
    async fn cached_token(&self) -> Option<String> {
        self.0.page_token.lock().unwrap().clone()
    }

    async fn shows_challenge(&self) -> Result<bool, BrowserError> {
        Ok(self.0.challenge.swap(false, Ordering::SeqCst))
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.0.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_chat(
        &self,
        token: &str,
        payload: &CreateChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        self.0.create_calls.fetch_add(1, Ordering::SeqCst);
        self.0.create_tokens.lock().unwrap().push(token.to_string());
        assert_eq!(payload.chat_type, "t2t");
        let (status, body) = self
            .0
            .create_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or((200, r#"{"success":true,"data":{"id":"chat-new"}}"#.to_string()));
        Ok(UpstreamReply {
            status,
            body: UpstreamBody::Bytes(Bytes::from(body)),
        })
    }

    async fn send_message(
        &self,
        token: &str,
        _chat_id: &str,
        _payload: &UpstreamChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        self.0.send_tokens.lock().unwrap().push(token.to_string());
        let next = self
            .0
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Body(200, HELLO_DOC.to_string()));
        match next {
            Scripted::Body(status, body) => Ok(UpstreamReply {
                status,
                body: UpstreamBody::Bytes(Bytes::from(body)),
            }),
            Scripted::Stream(chunks) => Ok(UpstreamReply {
                status: 200,
                body: UpstreamBody::Stream(stream_of(chunks, None)),
            }),
            Scripted::Broken(chunks, err) => Ok(UpstreamReply {
                status: 200,
                body: UpstreamBody::Stream(stream_of(chunks, Some(err))),
            }),
            Scripted::Fail(err) => Err(err),
        }
    }

    async fn close(&self) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn stream_of(chunks: Vec<&'static str>, failure: Option<BrowserError>) -> mpsc::Receiver<BodyChunk> {
    let (tx, rx) = mpsc::channel(chunks.len() + 1);
    for chunk in chunks {
        tx.try_send(Ok(Bytes::from_static(chunk.as_bytes()))).unwrap();
    }
    if let Some(err) = failure {
        tx.try_send(Err(err)).unwrap();
    }
    rx
}

struct Harness {
    dispatcher: Dispatcher,
    stub: Arc<StubState>,
    store: Arc<MemoryCredentialStore>,
    context: Arc<GatewayContext>,
    sessions: Arc<SessionPool>,
}

async fn harness(ids: &[&str], policy: ExhaustionPolicy) -> Harness {
    harness_with_context(ids, policy, GatewayContext::default()).await
}

async fn harness_with_context(
    ids: &[&str],
    policy: ExhaustionPolicy,
    context: GatewayContext,
) -> Harness {
    let stub = Arc::new(StubState::default());
    let credentials = ids
        .iter()
        .map(|id| Credential::new(*id, format!("token-{id}")))
        .collect();
    let store = Arc::new(MemoryCredentialStore::new(credentials));
    let pool = Arc::new(CredentialPool::load(store.clone()).await.unwrap());
    let sessions = Arc::new(SessionPool::new(Arc::new(StubBrowser(stub.clone())), 3));
    let context = Arc::new(context);
    let dispatcher = Dispatcher::new(
        pool,
        sessions.clone(),
        context.clone(),
        DispatcherConfig {
            request_timeout: Duration::from_secs(5),
            rate_limit_cooldown_hours: 24,
            exhaustion_policy: policy,
        },
    );
    Harness {
        dispatcher,
        stub,
        store,
        context,
        sessions,
    }
}

fn request() -> SendRequest {
    let mut request = SendRequest::text("hi", "m");
    request.chat_id = Some("chat-1".to_string());
    request
}

#[tokio::test]
async fn non_streaming_document_yields_content() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    let outcome = h.dispatcher.send(request()).await.unwrap();

    let response = outcome.completion.to_response();
    assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    assert_eq!(outcome.chat_id, "chat-1");
    assert_eq!(h.stub.sends(), vec!["token-a".to_string()]);
    assert_eq!(h.sessions.idle_len().await, 1);
}

#[tokio::test]
async fn streamed_reply_is_rechunked_for_the_client() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Stream(vec![
        "data: {\"response.created\":{\"response_id\":\"r-1\"}}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"abcde\"}}]}\ndata: {\"choi",
        "ces\":[{\"delta\":{\"content\":\"fghij\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"\",\"status\":\"finished\"}}]}\n",
    ]));

    let outcome = h.dispatcher.send(request()).await.unwrap();
    assert_eq!(outcome.completion.content, "abcdefghij");
    assert_eq!(outcome.parent_id.as_deref(), Some("r-1"));

    let frames = completion_frames(&outcome.completion, 4);
    let mut deltas = String::new();
    let mut saw_stop = false;
    for frame in &frames[..frames.len() - 1] {
        let text = std::str::from_utf8(frame).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(text.strip_prefix("data: ").unwrap().trim()).unwrap();
        if let Some(content) = value["choices"][0]["delta"]["content"].as_str() {
            deltas.push_str(content);
        }
        saw_stop |= value["choices"][0]["finish_reason"] == "stop";
    }
    assert_eq!(deltas, "abcdefghij");
    assert!(saw_stop);
    assert_eq!(&frames.last().unwrap()[..], b"data: [DONE]\n\n");
}

#[tokio::test]
async fn auth_failure_rotates_to_next_credential() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(401, "Unauthorized".to_string()));

    let outcome = h.dispatcher.send(request()).await.unwrap();
    assert_eq!(outcome.completion.content, "hello");
    assert_eq!(
        h.stub.sends(),
        vec!["token-a".to_string(), "token-b".to_string()]
    );

    let stored = h.store.snapshot().await;
    assert!(stored.iter().find(|c| c.id == "a").unwrap().invalid);
    assert!(!stored.iter().find(|c| c.id == "b").unwrap().invalid);
}

#[tokio::test]
async fn auth_failure_without_spare_credential_is_exhaustion() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(401, "".to_string()));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CredentialsExhausted(_)));
    assert_eq!(h.stub.sends().len(), 1);
    assert!(!h.context.shutdown_requested());

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CredentialsExhausted(_)));
    assert_eq!(h.stub.sends().len(), 1);
}

#[tokio::test]
async fn every_credential_failing_terminates() {
    let h = harness(&["a", "b", "c"], ExhaustionPolicy::Reject).await;
    for _ in 0..10 {
        h.stub.script(Scripted::Body(401, "Token has expired".to_string()));
    }

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CredentialsExhausted(_)));
    assert_eq!(h.stub.sends().len(), 3);
    assert!(h.store.snapshot().await.iter().all(|c| c.invalid));
}

#[tokio::test]
async fn rate_limit_sets_cooldown_from_hint() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(
        429,
        r#"{"code":"RateLimited","detail":"limit","num":4}"#.to_string(),
    ));

    let before = OffsetDateTime::now_utc();
    let outcome = h.dispatcher.send(request()).await.unwrap();
    assert_eq!(outcome.completion.content, "hello");
    assert_eq!(
        h.stub.sends(),
        vec!["token-a".to_string(), "token-b".to_string()]
    );

    let stored = h.store.snapshot().await;
    let limited = stored.iter().find(|c| c.id == "a").unwrap();
    let reset_at = limited.reset_at.unwrap();
    let expected = before + time::Duration::hours(4);
    assert!(reset_at >= expected);
    assert!(reset_at - expected < time::Duration::minutes(1));
    assert!(!limited.invalid);
}

#[tokio::test]
async fn verification_page_clears_sessions_and_restarts_interactive() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.context.shared_token().set("shared".to_string());
    h.stub.script(Scripted::Body(
        403,
        "<html><body>Verification required</body></html>".to_string(),
    ));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::VerificationRequired(_)));
    assert_eq!(h.stub.sends().len(), 1);
    assert!(!h.context.is_authenticated());
    assert!(h.context.shared_token().get().is_none());
    assert_eq!(h.sessions.idle_len().await, 0);
    assert_eq!(
        h.stub.restarts.lock().unwrap().clone(),
        vec![BrowserMode::Interactive]
    );
    assert!(h.store.snapshot().await.iter().all(|c| !c.invalid));
}

#[tokio::test]
async fn verification_page_with_success_status_is_not_a_completion() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(
        200,
        "<html><body>Verification required</body></html>".to_string(),
    ));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::VerificationRequired(_)));
    assert_eq!(h.sessions.idle_len().await, 0);
    assert!(!h.context.is_authenticated());
    assert_eq!(
        h.stub.restarts.lock().unwrap().clone(),
        vec![BrowserMode::Interactive]
    );
    assert_eq!(h.stub.sends().len(), 1);
}

#[tokio::test]
async fn streamed_page_without_events_is_classified() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    h.stub
        .script(Scripted::Stream(vec!["<html><body>", "captcha</body></html>"]));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::VerificationRequired(_)));
    assert_eq!(
        h.stub.restarts.lock().unwrap().clone(),
        vec![BrowserMode::Interactive]
    );
}

#[tokio::test]
async fn read_failure_mid_stream_is_not_a_success() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Broken(
        vec![
            "data: {\"response.created\":{\"response_id\":\"r-1\"}}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
        ],
        BrowserError::Timeout,
    ));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    match err {
        GatewayError::UpstreamOther(detail) => assert!(detail.contains("timed out")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.stub.sends().len(), 1);
    assert_eq!(h.stub.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.sessions.idle_len().await, 0);
    assert!(h.store.snapshot().await.iter().all(|c| !c.invalid));
}

#[tokio::test]
async fn new_chat_is_sent_with_the_credential_that_created_it() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    let outcome = h.dispatcher.send(SendRequest::text("hi", "m")).await.unwrap();

    assert_eq!(outcome.chat_id, "chat-new");
    let created = h.stub.create_tokens.lock().unwrap().clone();
    assert_eq!(created, vec!["token-a".to_string()]);
    assert_eq!(h.stub.sends(), created);
}

#[tokio::test]
async fn rejected_shared_token_is_removed_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file = SharedTokenFile::new(dir.path().join("auth_token.txt"));
    file.save("stale").await.unwrap();
    let context = GatewayContext::new(Some("stale".to_string())).with_token_file(file.clone());
    let h = harness_with_context(&[], ExhaustionPolicy::Reject, context).await;
    h.stub.script(Scripted::Body(401, "Unauthorized".to_string()));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthExpired(_)));
    assert_eq!(h.stub.sends(), vec!["stale".to_string()]);
    assert!(h.context.shared_token().get().is_none());
    assert_eq!(file.load().await.unwrap(), None);
}

#[tokio::test]
async fn challenge_on_handle_triggers_reload_before_send() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    h.stub.challenge.store(true, Ordering::SeqCst);

    h.dispatcher.send(request()).await.unwrap();
    assert_eq!(h.stub.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_policy_signals_serve_loop() {
    let h = harness(&["a"], ExhaustionPolicy::Shutdown).await;
    let mut shutdown = h.context.subscribe_shutdown();
    h.stub.script(Scripted::Body(401, "Unauthorized".to_string()));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CredentialsExhausted(_)));
    shutdown.changed().await.unwrap();
    assert!(*shutdown.borrow());
}

#[tokio::test]
async fn other_errors_are_not_retried() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(500, "internal".to_string()));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    match err {
        GatewayError::UpstreamOther(detail) => assert!(detail.contains("internal")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.stub.sends().len(), 1);
}

#[tokio::test]
async fn transport_failure_closes_handle() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Fail(BrowserError::Timeout));

    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamOther(_)));
    assert_eq!(h.sessions.idle_len().await, 0);
    assert_eq!(h.stub.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_chat_id_creates_session_first() {
    let h = harness(&["a"], ExhaustionPolicy::Reject).await;
    let outcome = h.dispatcher.send(SendRequest::text("hi", "m")).await.unwrap();

    assert_eq!(outcome.chat_id, "chat-new");
    assert_eq!(h.stub.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.stub.sends().len(), 1);
}

#[tokio::test]
async fn session_creation_failure_aborts_without_send() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    *h.stub.create_reply.lock().unwrap() =
        Some((200, r#"{"success":false,"data":{"code":"Bad"}}"#.to_string()));

    let err = h.dispatcher.send(SendRequest::text("hi", "m")).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamOther(_)));
    assert_eq!(h.stub.create_calls.load(Ordering::SeqCst), 1);
    assert!(h.stub.sends().is_empty());
}

#[tokio::test]
async fn empty_pool_uses_shared_browser_token() {
    let h = harness(&[], ExhaustionPolicy::Reject).await;
    *h.stub.page_token.lock().unwrap() = Some("page-token".to_string());

    h.dispatcher.send(request()).await.unwrap();
    assert_eq!(h.stub.sends(), vec!["page-token".to_string()]);
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn empty_pool_without_token_fails_cleanly() {
    let h = harness(&[], ExhaustionPolicy::Reject).await;
    let err = h.dispatcher.send(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthExpired(_)));
    assert!(h.stub.sends().is_empty());
}

#[tokio::test]
async fn rate_limit_in_success_document_is_recovered() {
    let h = harness(&["a", "b"], ExhaustionPolicy::Reject).await;
    h.stub.script(Scripted::Body(
        200,
        r#"{"success":false,"data":{"code":"RateLimited","num":2}}"#.to_string(),
    ));

    h.dispatcher.send(request()).await.unwrap();
    let stored = h.store.snapshot().await;
    assert!(stored.iter().find(|c| c.id == "a").unwrap().reset_at.is_some());
}
