use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Credential, CredentialStore, CredentialView};
use crate::errors::ProviderResult;

struct PoolState {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// Rotating set of upstream identities.
///
/// Selection is round-robin over the eligible subset; the cursor wraps
/// modulo the eligible count recomputed on every call, so fairness is
/// approximate when eligibility changes between calls. Every mutation
/// rewrites the whole list through the [`CredentialStore`] while the lock is
/// held, so writes reach storage in the order they were applied.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    store: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool").finish_non_exhaustive()
    }
}

impl CredentialPool {
    pub async fn load(store: Arc<dyn CredentialStore>) -> ProviderResult<Self> {
        let credentials = store.load().await?;
        info!(
            event = "credentials_loaded",
            count = credentials.len(),
            "credential pool loaded"
        );
        Ok(Self {
            state: Mutex::new(PoolState {
                credentials,
                cursor: 0,
            }),
            store,
        })
    }

    /// Re-reads the store, keeping the rotation cursor.
    pub async fn reload(&self) -> ProviderResult<usize> {
        let credentials = self.store.load().await?;
        let mut state = self.state.lock().await;
        state.credentials = credentials;
        Ok(state.credentials.len())
    }

    pub async fn acquire(&self) -> Option<Credential> {
        self.acquire_at(OffsetDateTime::now_utc()).await
    }

    pub async fn acquire_at(&self, now: OffsetDateTime) -> Option<Credential> {
        let mut state = self.state.lock().await;
        let eligible: Vec<usize> = state
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, credential)| credential.is_eligible(now))
            .map(|(index, _)| index)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let picked = eligible[state.cursor % eligible.len()];
        state.cursor = (state.cursor + 1) % eligible.len();
        Some(state.credentials[picked].clone())
    }

    pub async fn has_eligible(&self) -> bool {
        self.has_eligible_at(OffsetDateTime::now_utc()).await
    }

    pub async fn has_eligible_at(&self, now: OffsetDateTime) -> bool {
        self.state
            .lock()
            .await
            .credentials
            .iter()
            .any(|credential| credential.is_eligible(now))
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.credentials.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.credentials.len()
    }

    pub async fn list(&self) -> Vec<Credential> {
        self.state.lock().await.credentials.clone()
    }

    pub async fn views(&self) -> Vec<CredentialView> {
        let now = OffsetDateTime::now_utc();
        self.state
            .lock()
            .await
            .credentials
            .iter()
            .map(|credential| credential.view(now))
            .collect()
    }

    /// Returns `false` when the id is unknown.
    pub async fn mark_invalid(&self, id: &str) -> ProviderResult<bool> {
        let found = self
            .mutate(id, |credential| credential.invalid = true)
            .await?;
        if found {
            warn!(event = "credential_invalid", credential_id = %id, "credential marked invalid");
        }
        Ok(found)
    }

    pub async fn mark_rate_limited(&self, id: &str, hours: u64) -> ProviderResult<bool> {
        self.mark_rate_limited_at(id, hours, OffsetDateTime::now_utc())
            .await
    }

    pub async fn mark_rate_limited_at(
        &self,
        id: &str,
        hours: u64,
        now: OffsetDateTime,
    ) -> ProviderResult<bool> {
        let offset = i64::try_from(hours)
            .ok()
            .and_then(|hours| hours.checked_mul(3600))
            .map_or(Duration::MAX, Duration::seconds);
        let reset_at = now.saturating_add(offset);
        let found = self
            .mutate(id, |credential| credential.reset_at = Some(reset_at))
            .await?;
        if found {
            warn!(
                event = "credential_rate_limited",
                credential_id = %id,
                hours,
                "credential cooling down"
            );
        }
        Ok(found)
    }

    /// Clears `invalid` and `resetAt`; installs `token` when given.
    pub async fn mark_valid(&self, id: &str, token: Option<String>) -> ProviderResult<bool> {
        let found = self
            .mutate(id, |credential| {
                credential.invalid = false;
                credential.reset_at = None;
                if let Some(token) = token.filter(|token| !token.is_empty()) {
                    credential.token = token;
                }
            })
            .await?;
        if found {
            info!(event = "credential_valid", credential_id = %id, "credential restored");
        }
        Ok(found)
    }

    /// Adds a freshly obtained token under a generated id.
    pub async fn insert(&self, token: impl Into<String>) -> ProviderResult<Credential> {
        let credential = Credential::new(format!("acc_{}", Uuid::new_v4().simple()), token);
        let mut state = self.state.lock().await;
        state.credentials.push(credential.clone());
        self.store.save(&state.credentials).await?;
        info!(event = "credential_added", credential_id = %credential.id, "credential added");
        Ok(credential)
    }

    pub async fn remove(&self, id: &str) -> ProviderResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.credentials.len();
        state.credentials.retain(|credential| credential.id != id);
        if state.credentials.len() == before {
            return Ok(false);
        }
        self.store.save(&state.credentials).await?;
        info!(event = "credential_removed", credential_id = %id, "credential removed");
        Ok(true)
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> ProviderResult<bool>
    where
        F: FnOnce(&mut Credential),
    {
        let mut state = self.state.lock().await;
        let Some(credential) = state
            .credentials
            .iter_mut()
            .find(|credential| credential.id == id)
        else {
            return Ok(false);
        };
        apply(credential);
        self.store.save(&state.credentials).await?;
        Ok(true)
    }
}
