use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SharedToken;
use crate::browser::{BrowserError, BrowserTab, UpstreamBrowser};

/// An upstream execution context checked out of the [`SessionPool`].
///
/// Not `Clone`: whoever holds the handle has exclusive use of the tab until
/// it is released back or closed.
pub struct SessionHandle {
    id: u64,
    tab: Box<dyn BrowserTab>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tab(&self) -> &dyn BrowserTab {
        self.tab.as_ref()
    }

    pub async fn close(self) {
        debug!(event = "session_closed", session_id = self.id);
        self.tab.close().await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Bounded LIFO stack of idle browser tabs.
pub struct SessionPool {
    browser: Arc<dyn UpstreamBrowser>,
    capacity: usize,
    idle: Mutex<Vec<SessionHandle>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    pub fn new(browser: Arc<dyn UpstreamBrowser>, capacity: usize) -> Self {
        Self {
            browser,
            capacity: capacity.max(1),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn browser(&self) -> &Arc<dyn UpstreamBrowser> {
        &self.browser
    }

    pub async fn idle_len(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Reuses the most recently released tab, or opens a new one. A new tab
    /// seeds `shared` with the page's cached token when nothing is cached
    /// yet; a missing token is not an error.
    pub async fn acquire(&self, shared: &SharedToken) -> Result<SessionHandle, BrowserError> {
        if let Some(handle) = self.idle.lock().await.pop() {
            debug!(event = "session_reused", session_id = handle.id);
            return Ok(handle);
        }

        let tab = self.browser.open_tab().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !shared.is_set()
            && let Some(token) = tab.cached_token().await
            && shared.set_if_empty(token)
        {
            info!(event = "shared_token_cached", session_id = id, "cached page token");
        }
        debug!(event = "session_opened", session_id = id);
        Ok(SessionHandle { id, tab })
    }

    pub async fn release(&self, handle: SessionHandle) {
        let overflow = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.capacity {
                idle.push(handle);
                None
            } else {
                Some(handle)
            }
        };
        if let Some(handle) = overflow {
            handle.close().await;
        }
    }

    /// Closes every idle tab. Handles currently checked out are unaffected
    /// and are closed or pooled when their holder releases them.
    pub async fn clear(&self) {
        let drained: Vec<SessionHandle> = std::mem::take(&mut *self.idle.lock().await);
        let count = drained.len();
        for handle in drained {
            handle.close().await;
        }
        info!(event = "session_pool_cleared", closed = count);
    }
}
