//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;

/// Lock file name inside the package cache directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Advisory lock on the package cache, shared by every updater process on the
/// device. Released when dropped.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Lock file guarding `artifact_path`.
    pub fn path_for(artifact_path: &Path) -> PathBuf {
        artifact_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(LOCK_FILE_NAME)
    }

    /// Wait for exclusive ownership of the cache that holds `artifact_path`.
    pub async fn acquire(artifact_path: &Path) -> Result<Self> {
        let path = Self::path_for(artifact_path);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("unable to create cache directory {}", dir.display()))?;
        }

        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
                .with_context(|| format!("unable to open lock file {}", lock_path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("unable to lock {}", lock_path.display()))?;
            Ok(file)
        })
        .await
        .context("cache lock task panicked")??;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_lives_next_to_artifact() {
        assert_eq!(
            CacheLock::path_for(Path::new("/data/local/tmp/updater/cache/app.apk")),
            PathBuf::from("/data/local/tmp/updater/cache/.lock")
        );
        assert_eq!(CacheLock::path_for(Path::new("app.apk")), PathBuf::from("./.lock"));
    }

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("cache").join("app.apk");

        let first = CacheLock::acquire(&artifact).await.unwrap();
        assert!(first.path().exists());

        let waiter = tokio::spawn({
            let artifact = artifact.clone();
            async move { CacheLock::acquire(&artifact).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.path(), dir.path().join("cache").join(LOCK_FILE_NAME));
    }
}
