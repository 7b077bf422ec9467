use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use chatgate_provider_core::{Credential, CredentialStore, ProviderError, ProviderResult};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for ProviderError {
    fn from(value: StorageError) -> Self {
        ProviderError::Storage(value.to_string())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Credential list kept as one pretty-printed JSON array.
///
/// Saves write a sibling temp file and rename it over the target, so a crash
/// mid-write leaves the previous list intact. A missing file loads as an
/// empty list.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_all(&self) -> StorageResult<Vec<Credential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(event = "credentials_file_missing", path = %self.path.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(io_error(&self.path)(err)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn write_all(&self, credentials: &[Credential]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        let body = serde_json::to_vec_pretty(credentials)?;
        let tmp = self.temp_path();
        if let Err(err) = tokio::fs::write(&tmp, &body).await {
            return Err(io_error(&tmp)(err));
        }
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(
                    event = "credentials_tmp_cleanup_failed",
                    path = %tmp.display(),
                    error = %cleanup
                );
            }
            return Err(io_error(&self.path)(err));
        }
        debug!(
            event = "credentials_saved",
            path = %self.path.display(),
            count = credentials.len()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokens.json".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl CredentialStore for JsonFileStorage {
    async fn load(&self) -> ProviderResult<Vec<Credential>> {
        Ok(self.read_all().await?)
    }

    async fn save(&self, credentials: &[Credential]) -> ProviderResult<()> {
        Ok(self.write_all(credentials).await?)
    }
}
