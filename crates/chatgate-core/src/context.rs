use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::warn;

use chatgate_provider_core::SharedToken;
use chatgate_storage::SharedTokenFile;

/// Process-wide gateway state shared by every dispatch.
///
/// Holds the browser session's authentication flag and shared token (both
/// separate from per-credential tokens) and the shutdown signal raised by
/// the `shutdown` exhaustion policy.
#[derive(Debug)]
pub struct GatewayContext {
    authenticated: AtomicBool,
    shared_token: SharedToken,
    /// Durable copy of the shared token; fresh tabs read it back.
    token_file: Option<SharedTokenFile>,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayContext {
    pub fn new(shared_token: Option<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            authenticated: AtomicBool::new(true),
            shared_token: SharedToken::new(shared_token),
            token_file: None,
            shutdown_tx,
        }
    }

    pub fn with_token_file(mut self, token_file: SharedTokenFile) -> Self {
        self.token_file = Some(token_file);
        self
    }

    pub fn shared_token(&self) -> &SharedToken {
        &self.shared_token
    }

    /// Drops the shared token in memory and on disk, so the next tab cannot
    /// seed the same rejected token again.
    pub async fn discard_shared_token(&self) {
        self.shared_token.clear();
        if let Some(file) = self.token_file.as_ref() {
            file.clear().await;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn request_shutdown(&self, reason: &str) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        warn!(event = "shutdown_requested", reason = %reason, "gateway shutdown requested");
    }
}

impl Default for GatewayContext {
    fn default() -> Self {
        Self::new(None)
    }
}
