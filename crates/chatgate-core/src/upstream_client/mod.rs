use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use wreq::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, SET_COOKIE};
use wreq::{Client, Proxy};
use wreq_util::Emulation;

use chatgate_common::GlobalConfig;
use chatgate_protocol::upstream::chat::{CHAT_TYPE_TEXT, CreateChatPayload, UpstreamChatPayload};
use chatgate_provider_core::{
    BodyChunk, BrowserError, BrowserMode, BrowserTab, ProbeStatus, UpstreamBody,
    UpstreamBrowser, UpstreamReply,
};
use chatgate_storage::SharedTokenFile;

use crate::classify::looks_like_challenge;

const CHAT_COMPLETIONS_PATH: &str = "/api/v2/chat/completions";
const CREATE_CHAT_PATH: &str = "/api/v2/chats/new";

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub base_url: String,
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Idle limit between reads of one response.
    pub read_timeout: Duration,
    /// Written by the external login flow; read as the page's cached token.
    pub token_file: PathBuf,
    /// Model named in token probes.
    pub probe_model: String,
}

impl BrowserConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            base_url: global.upstream_base_url.clone(),
            proxy: global.proxy.clone(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(global.request_timeout_secs),
            token_file: global.shared_token_path(),
            probe_model: global.default_model.clone(),
        }
    }

    fn entry_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Browser capability backed by a browser-emulating HTTP client.
///
/// A "tab" is the entry page fetched with the current client; restarting
/// swaps in a fresh client, which drops every cookie the old one held.
pub struct WreqBrowser {
    config: Arc<BrowserConfig>,
    client: ArcSwap<Client>,
}

impl WreqBrowser {
    pub fn new(config: BrowserConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client: ArcSwap::from_pointee(client),
        })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

fn build_client(config: &BrowserConfig) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .emulation(Emulation::Chrome136)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout);

    if let Some(proxy) = config.proxy.as_deref() {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

#[async_trait]
impl UpstreamBrowser for WreqBrowser {
    async fn open_tab(&self) -> Result<Box<dyn BrowserTab>, BrowserError> {
        let client = self.client.load_full();
        let page = fetch_entry_page(&client, &self.config).await?;
        let token_file = SharedTokenFile::new(self.config.token_file.clone());
        if let Some(token) = page.cookie_token.as_deref()
            && let Err(err) = token_file.save(token).await
        {
            warn!(event = "shared_token_save_failed", error = %err);
        }
        Ok(Box::new(WreqTab {
            client,
            config: self.config.clone(),
            page: Mutex::new(page),
            token_file,
        }))
    }

    async fn restart(&self, mode: BrowserMode) -> Result<(), BrowserError> {
        let client = build_client(&self.config).map_err(map_wreq_error)?;
        self.client.store(Arc::new(client));
        match mode {
            BrowserMode::Headless => info!(event = "browser_restarted", mode = "headless"),
            BrowserMode::Interactive => warn!(
                event = "browser_restarted",
                mode = "interactive",
                entry_url = %self.config.entry_url(),
                token_file = %self.config.token_file.display(),
                "open the entry page in a browser, pass the verification, and store the session token"
            ),
        }
        Ok(())
    }

    async fn probe_token(&self, token: &str) -> ProbeStatus {
        let client = self.client.load_full();
        let body = json!({
            "chat_type": CHAT_TYPE_TEXT,
            "messages": [{"role": "user", "content": "ping", "chat_type": CHAT_TYPE_TEXT}],
            "model": self.config.probe_model,
            "stream": false,
        });
        let request = match json_request(&client, &self.config.url(CHAT_COMPLETIONS_PATH), token, &body) {
            Ok(request) => request,
            Err(_) => return ProbeStatus::Error,
        };
        match request.send().await {
            Ok(resp) => ProbeStatus::from_status(resp.status().as_u16()),
            Err(err) => {
                debug!(event = "token_probe_failed", error = %err);
                ProbeStatus::Error
            }
        }
    }
}

struct EntryPage {
    html: String,
    cookie_token: Option<String>,
}

async fn fetch_entry_page(client: &Client, config: &BrowserConfig) -> Result<EntryPage, BrowserError> {
    let resp = client
        .get(config.entry_url())
        .send()
        .await
        .map_err(|err| match map_wreq_error(err) {
            BrowserError::Transport(msg) => BrowserError::Navigation(msg),
            other => other,
        })?;
    let status = resp.status().as_u16();
    let cookie_token = token_from_cookies(resp.headers());
    let html = resp.text().await.map_err(map_wreq_error)?;
    if status >= 500 {
        return Err(BrowserError::Navigation(format!(
            "entry page returned status {status}"
        )));
    }
    Ok(EntryPage { html, cookie_token })
}

fn token_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix("token="))
        .map(str::to_string)
        .find(|token| !token.is_empty())
}

struct WreqTab {
    client: Arc<Client>,
    config: Arc<BrowserConfig>,
    page: Mutex<EntryPage>,
    token_file: SharedTokenFile,
}

impl WreqTab {
    fn page_shows_challenge(&self) -> Result<bool, BrowserError> {
        let page = self.page.lock().map_err(|_| BrowserError::Closed)?;
        Ok(looks_like_challenge(&page.html))
    }
}

#[async_trait]
impl BrowserTab for WreqTab {
    async fn cached_token(&self) -> Option<String> {
        let cookie_token = self
            .page
            .lock()
            .ok()
            .and_then(|page| page.cookie_token.clone());
        if cookie_token.is_some() {
            return cookie_token;
        }
        match self.token_file.load().await {
            Ok(token) => token,
            Err(err) => {
                warn!(event = "shared_token_read_failed", error = %err);
                None
            }
        }
    }

    async fn shows_challenge(&self) -> Result<bool, BrowserError> {
        self.page_shows_challenge()
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        let page = fetch_entry_page(&self.client, &self.config).await?;
        let mut current = self.page.lock().map_err(|_| BrowserError::Closed)?;
        *current = page;
        Ok(())
    }

    async fn create_chat(
        &self,
        token: &str,
        payload: &CreateChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        let request = json_request(&self.client, &self.config.url(CREATE_CHAT_PATH), token, payload)?;
        let resp = request.send().await.map_err(map_wreq_error)?;
        convert_response(resp, false).await
    }

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        payload: &UpstreamChatPayload,
    ) -> Result<UpstreamReply, BrowserError> {
        let query = serde_urlencoded::to_string([("chat_id", chat_id)])
            .map_err(|err| BrowserError::Transport(err.to_string()))?;
        let url = format!("{}?{query}", self.config.url(CHAT_COMPLETIONS_PATH));
        let request = json_request(&self.client, &url, token, payload)?;
        let resp = request.send().await.map_err(map_wreq_error)?;
        convert_response(resp, true).await
    }

    async fn close(&self) {}
}

fn json_request<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    token: &str,
    body: &T,
) -> Result<wreq::RequestBuilder, BrowserError> {
    let body = serde_json::to_vec(body).map_err(|err| BrowserError::Transport(err.to_string()))?;
    Ok(client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "*/*")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(body))
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
) -> Result<UpstreamReply, BrowserError> {
    let status = resp.status().as_u16();
    let is_event_stream = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"));

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream || !is_event_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamReply {
            status,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<BodyChunk>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let item = item.map_err(|err| {
                debug!(event = "upstream_stream_error", error = %err);
                map_wreq_error(err)
            });
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(UpstreamReply {
        status,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_wreq_error(err: wreq::Error) -> BrowserError {
    if err.is_timeout() {
        return BrowserError::Timeout;
    }
    BrowserError::Transport(err.to_string())
}
