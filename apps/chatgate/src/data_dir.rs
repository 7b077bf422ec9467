use std::path::Path;

use tracing::info;

/// Creates the data directory if needed. Credentials and the shared browser
/// token both live under it.
pub(crate) async fn prepare_data_dir(path: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    tokio::fs::create_dir_all(path).await?;
    info!(event = "data_dir_created", path = %path.display());
    Ok(())
}
