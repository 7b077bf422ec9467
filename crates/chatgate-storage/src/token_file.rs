use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::{StorageError, StorageResult};

/// Plain-text file holding the browser session's shared bearer token.
#[derive(Debug, Clone)]
pub struct SharedTokenFile {
    path: PathBuf,
}

impl SharedTokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing or blank.
    pub async fn load(&self) -> StorageResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub async fn save(&self, token: &str) -> StorageResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&self.path, token)
            .await
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(event = "shared_token_saved", path = %self.path.display());
        Ok(())
    }

    pub async fn clear(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(event = "shared_token_cleared", path = %self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                event = "shared_token_clear_failed",
                path = %self.path.display(),
                error = %err
            ),
        }
    }
}
