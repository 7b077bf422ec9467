use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Process-wide bearer token read from the logged-in browser context.
///
/// Kept apart from per-credential tokens: it is only used when the
/// credential list is empty, and never written into it.
#[derive(Debug, Default)]
pub struct SharedToken {
    inner: ArcSwapOption<String>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: ArcSwapOption::new(token.map(Arc::new)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.inner.load_full().map(|token| token.as_ref().clone())
    }

    pub fn is_set(&self) -> bool {
        self.inner.load().is_some()
    }

    pub fn set(&self, token: String) {
        self.inner.store(Some(Arc::new(token)));
    }

    /// Stores `token` only when nothing is cached yet. Returns whether it was
    /// stored.
    pub fn set_if_empty(&self, token: String) -> bool {
        let token = Arc::new(token);
        let previous = self
            .inner
            .compare_and_swap(&None::<Arc<String>>, Some(token));
        previous.is_none()
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }
}
