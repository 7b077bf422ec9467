use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use chatgate_protocol::upstream::chat::{CreateChatPayload, UpstreamChatPayload};

/// How the upstream browser context is (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMode {
    Headless,
    /// Visible context so a human can resolve a challenge page.
    Interactive,
}

/// Outcome of a lightweight "ping" made with one credential's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    Unauthorized,
    RateLimited,
    Error,
}

impl ProbeStatus {
    /// 2xx and 400 both prove the token was accepted.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 | 400 => ProbeStatus::Ok,
            401 | 403 => ProbeStatus::Unauthorized,
            429 => ProbeStatus::RateLimited,
            _ => ProbeStatus::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeStatus::Ok => "ok",
            ProbeStatus::Unauthorized => "unauthorized",
            ProbeStatus::RateLimited => "rate_limited",
            ProbeStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    Timeout,
    Navigation(String),
    Transport(String),
    Closed,
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::Timeout => write!(f, "upstream request timed out"),
            BrowserError::Navigation(msg) => write!(f, "navigation failed: {msg}"),
            BrowserError::Transport(msg) => write!(f, "transport error: {msg}"),
            BrowserError::Closed => write!(f, "browser context closed"),
        }
    }
}

impl Error for BrowserError {}

/// A read failure mid-body arrives as an `Err` item; the channel closing
/// without one means the upstream finished the body.
pub type BodyChunk = Result<Bytes, BrowserError>;

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<BodyChunk>),
}

impl UpstreamBody {
    /// Drains the body into one buffer. Used for error bodies and for
    /// upstreams that answer with a single document.
    pub async fn collect(self) -> Result<Bytes, BrowserError> {
        match self {
            UpstreamBody::Bytes(bytes) => Ok(bytes),
            UpstreamBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

#[derive(Debug)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: UpstreamBody,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The browser automation capability. Implementations own the underlying
/// engine; the gateway only opens tabs and restarts the context.
#[async_trait]
pub trait UpstreamBrowser: Send + Sync {
    /// Opens a fresh execution context already navigated to the upstream
    /// entry page.
    async fn open_tab(&self) -> Result<Box<dyn BrowserTab>, BrowserError>;

    async fn restart(&self, mode: BrowserMode) -> Result<(), BrowserError>;

    async fn probe_token(&self, token: &str) -> ProbeStatus;
}

/// One upstream execution context. Held by at most one caller at a time.
#[async_trait]
pub trait BrowserTab: Send + Sync {
    /// Bearer token the logged-in page has cached, if any.
    async fn cached_token(&self) -> Option<String>;

    async fn shows_challenge(&self) -> Result<bool, BrowserError>;

    async fn reload(&self) -> Result<(), BrowserError>;

    async fn create_chat(
        &self,
        token: &str,
        payload: &CreateChatPayload,
    ) -> Result<UpstreamReply, BrowserError>;

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        payload: &UpstreamChatPayload,
    ) -> Result<UpstreamReply, BrowserError>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_status_mapping() {
        assert_eq!(ProbeStatus::from_status(200), ProbeStatus::Ok);
        assert_eq!(ProbeStatus::from_status(400), ProbeStatus::Ok);
        assert_eq!(ProbeStatus::from_status(403), ProbeStatus::Unauthorized);
        assert_eq!(ProbeStatus::from_status(429), ProbeStatus::RateLimited);
        assert_eq!(ProbeStatus::from_status(502), ProbeStatus::Error);
    }

    #[tokio::test]
    async fn collect_drains_stream() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"cd"))).await.unwrap();
        drop(tx);
        let body = UpstreamBody::Stream(rx).collect().await.unwrap();
        assert_eq!(&body[..], b"abcd");
    }

    #[tokio::test]
    async fn collect_surfaces_read_failure() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(Err(BrowserError::Timeout)).await.unwrap();
        drop(tx);
        let err = UpstreamBody::Stream(rx).collect().await.unwrap_err();
        assert_eq!(err, BrowserError::Timeout);
    }
}
