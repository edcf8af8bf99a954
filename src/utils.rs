use std::path::Path;

use anyhow::Result;
use log::{error, info};
use tokio::fs;

/// Creates `path` and its parents if they are missing. Safe to call repeatedly.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() || fs::try_exists(path).await? {
        return Ok(());
    }
    if let Err(e) = fs::create_dir_all(path).await {
        error!("Failed to create directory at {:?}: {}", path, e);
        return Err(e.into());
    }
    info!("Created directory at: {:?}", path);
    Ok(())
}

/// Creates the parent directory of a file path, if it has one.
pub async fn ensure_parent_exists<P: AsRef<Path>>(file: P) -> Result<()> {
    match file.as_ref().parent() {
        Some(parent) => ensure_directory_exists(parent).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_nested_directories_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_directory_exists(&nested).await.unwrap();
        ensure_directory_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn bare_file_name_has_nothing_to_create() {
        ensure_parent_exists("store.json").await.unwrap();
    }
}
