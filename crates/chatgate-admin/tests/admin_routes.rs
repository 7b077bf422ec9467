use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value as JsonValue, json};
use tower::ServiceExt;

use chatgate_admin::{AdminState, router};
use chatgate_common::GlobalConfigPatch;
use chatgate_core::{Dispatcher, DispatcherConfig, GatewayContext};
use chatgate_protocol::upstream::chat::{CreateChatPayload, UpstreamChatPayload};
use chatgate_provider_core::{
    BrowserError, BrowserMode, BrowserTab, Credential, CredentialPool, MemoryCredentialStore,
    ProbeStatus, SessionPool, UpstreamBrowser, UpstreamReply,
};

const ADMIN_KEY: &str = "admin-secret";

#[derive(Default)]
struct RecordingBrowser {
    restarts: Mutex<Vec<BrowserMode>>,
}

#[async_trait]
impl UpstreamBrowser for RecordingBrowser {
    async fn open_tab(&self) -> Result<Box<dyn BrowserTab>, BrowserError> {
        Ok(Box::new(IdleTab))
    }

    async fn restart(&self, mode: BrowserMode) -> Result<(), BrowserError> {
        self.restarts.lock().unwrap().push(mode);
        Ok(())
    }

    async fn probe_token(&self, _token: &str) -> ProbeStatus {
        ProbeStatus::Ok
    }
}

struct IdleTab;

#[async_trait]
impl BrowserTab for IdleTab {
    async fn cached_token(&self) -> Option<String> {
        None
    }

    async fn shows_challenge(&self) -> Result<bool, BrowserError> {
        Ok(false)
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn create_chat(
        &self,
        _token: &str,
        _payload: &CreateChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        Err(BrowserError::Closed)
    }

    async fn send_message(
        &self,
        _token: &str,
        _chat_id: &str,
        _payload: &UpstreamChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        Err(BrowserError::Closed)
    }

    async fn close(&self) {}
}

struct Admin {
    router: Router,
    store: Arc<MemoryCredentialStore>,
    browser: Arc<RecordingBrowser>,
    context: Arc<GatewayContext>,
}

async fn admin(credentials: Vec<Credential>) -> Admin {
    let store = Arc::new(MemoryCredentialStore::new(credentials));
    let pool = Arc::new(CredentialPool::load(store.clone()).await.unwrap());
    let browser = Arc::new(RecordingBrowser::default());
    let sessions = Arc::new(SessionPool::new(browser.clone(), 3));
    let context = Arc::new(GatewayContext::default());
    let dispatcher = Dispatcher::new(pool, sessions, context.clone(), DispatcherConfig::default());
    let state = AdminState {
        dispatcher: Arc::new(dispatcher),
        global: Arc::new(GlobalConfigPatch::default().into_config().unwrap()),
        admin_key: Arc::from(ADMIN_KEY),
    };
    Admin {
        router: router(state),
        store,
        browser,
        context,
    }
}

fn request(method: &str, uri: &str, body: Option<JsonValue>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(resp: axum::response::Response) -> JsonValue {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn rejects_missing_or_wrong_key() {
    let admin = admin(Vec::new()).await;

    let resp = admin
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = admin
        .router
        .clone()
        .oneshot(
            Request::get("/health")
                .header("x-admin-key", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = admin
        .router
        .oneshot(
            Request::get(format!("/health?admin_key={ADMIN_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn lists_credentials_without_tokens() {
    let mut invalid = Credential::new("acc_2", "secret-token-2");
    invalid.invalid = true;
    let admin = admin(vec![Credential::new("acc_1", "secret-token-1"), invalid]).await;

    let resp = admin
        .router
        .oneshot(request("GET", "/credentials", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let value = body_json(resp).await;
    let text = value.to_string();
    assert!(!text.contains("secret-token"));

    let credentials = value["credentials"].as_array().unwrap();
    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials[0]["id"], "acc_1");
    assert_eq!(credentials[0]["eligible"], true);
    assert_eq!(credentials[1]["eligible"], false);
}

#[tokio::test]
async fn add_then_delete_credential() {
    let admin = admin(Vec::new()).await;

    let resp = admin
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/credentials",
            Some(json!({ "token": "fresh-token" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = body_json(resp).await["credential"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(id.starts_with("acc_"));
    assert_eq!(admin.store.snapshot().await[0].token, "fresh-token");

    let resp = admin
        .router
        .clone()
        .oneshot(request("DELETE", &format!("/credentials/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(admin.store.snapshot().await.is_empty());

    let resp = admin
        .router
        .oneshot(request("DELETE", &format!("/credentials/{id}"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn revalidate_clears_flags_and_swaps_token() {
    let mut credential = Credential::new("acc_1", "old-token");
    credential.invalid = true;
    credential.reset_at = Some(time::OffsetDateTime::now_utc() + time::Duration::hours(3));
    let admin = admin(vec![credential]).await;

    let resp = admin
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/credentials/acc_1/valid",
            Some(json!({ "token": "new-token" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let stored = admin.store.snapshot().await;
    assert!(!stored[0].invalid);
    assert!(stored[0].reset_at.is_none());
    assert_eq!(stored[0].token, "new-token");

    let resp = admin
        .router
        .clone()
        .oneshot(request("POST", "/credentials/acc_1/valid", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(admin.store.snapshot().await[0].token, "new-token");

    let resp = admin
        .router
        .oneshot(request("POST", "/credentials/missing/valid", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn restart_returns_to_headless_and_authenticated() {
    let admin = admin(Vec::new()).await;
    admin.context.set_authenticated(false);
    admin.context.shared_token().set("stale".to_string());

    let resp = admin
        .router
        .oneshot(request("POST", "/session/restart", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(admin.context.is_authenticated());
    assert!(admin.context.shared_token().get().is_none());
    assert_eq!(
        admin.browser.restarts.lock().unwrap().clone(),
        vec![BrowserMode::Headless]
    );
}
