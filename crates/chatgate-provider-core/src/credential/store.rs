use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Credential;
use crate::errors::ProviderResult;

/// Durable home of the credential list. `save` always receives the whole
/// list and replaces what was stored before.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> ProviderResult<Vec<Credential>>;

    async fn save(&self, credentials: &[Credential]) -> ProviderResult<()>;
}

/// Volatile store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Vec<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials: Mutex::new(credentials),
        }
    }

    pub async fn snapshot(&self) -> Vec<Credential> {
        self.credentials.lock().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> ProviderResult<Vec<Credential>> {
        Ok(self.credentials.lock().await.clone())
    }

    async fn save(&self, credentials: &[Credential]) -> ProviderResult<()> {
        *self.credentials.lock().await = credentials.to_vec();
        Ok(())
    }
}
