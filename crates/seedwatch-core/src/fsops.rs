//! Filesystem operations used by the importers and the relocation pool

use crate::error::SeedwatchError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// File operations the core delegates to
#[async_trait]
pub trait FileOps: Send + Sync {
    /// Copy a single file, creating the destination's parent folders
    async fn copy(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError>;

    /// Remove a file or a whole directory tree
    async fn remove(&self, path: &Path) -> Result<(), SeedwatchError>;

    /// Move `src` to `dst` and leave a symlink at `src` pointing to `dst`
    async fn move_and_link_back(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError>;
}

/// [`FileOps`] on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileOps;

impl LocalFileOps {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileOps for LocalFileOps {
    async fn copy(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, dst).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<(), SeedwatchError> {
        remove_path(path).await
    }

    async fn move_and_link_back(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
        let metadata = fs::symlink_metadata(src).await.map_err(|e| {
            SeedwatchError::Relocation(format!("{} is not accessible: {}", src.display(), e))
        })?;

        // A previous run may already have moved the data and linked it back
        if metadata.file_type().is_symlink() {
            if fs::read_link(src).await? == dst {
                debug!("{} already links to {}", src.display(), dst.display());
                return Ok(());
            }
            return Err(SeedwatchError::Relocation(format!(
                "{} is a symlink to somewhere else",
                src.display()
            )));
        }

        if fs::symlink_metadata(dst).await.is_ok() {
            return Err(SeedwatchError::Relocation(format!(
                "destination {} already exists",
                dst.display()
            )));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(src, dst).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                debug!("Cross-device move of {}, copying instead", src.display());
                copy_into_place(src, dst).await?;
                self.remove(src).await?;
            }
            Err(e) => return Err(e.into()),
        }

        link(dst, src, metadata.is_dir()).await?;
        info!("Moved {} to {} and linked back", src.display(), dst.display());
        Ok(())
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::CrossesDevices
}

async fn remove_path(path: &Path) -> Result<(), SeedwatchError> {
    let metadata = fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}

/// `dst` with `.partial` appended to its file name
fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    dst.with_file_name(name)
}

/// Copy `src` to a `.partial` sibling of `dst`, then rename it into place.
/// Nothing is left at `dst` when the copy fails.
async fn copy_into_place(src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
    let partial = partial_path(dst);
    if fs::symlink_metadata(&partial).await.is_ok() {
        debug!("Removing leftover {}", partial.display());
        remove_path(&partial).await?;
    }

    if let Err(e) = copy_tree(src, &partial).await {
        if fs::symlink_metadata(&partial).await.is_ok() {
            if let Err(cleanup) = remove_path(&partial).await {
                warn!("Failed to clean up {}: {}", partial.display(), cleanup);
            }
        }
        return Err(SeedwatchError::Relocation(format!(
            "copying {} failed: {}",
            src.display(),
            e
        )));
    }

    fs::rename(&partial, dst).await?;
    Ok(())
}

/// Copy a file or directory tree without following symlinks
async fn copy_tree(src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        let file_type = fs::symlink_metadata(&from).await?.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from).await?;
            link(&target, &to, false).await?;
        } else {
            fs::copy(&from, &to).await?;
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn link(target: &Path, at: &Path, _is_dir: bool) -> Result<(), SeedwatchError> {
    fs::symlink(target, at).await?;
    Ok(())
}

#[cfg(windows)]
async fn link(target: &Path, at: &Path, is_dir: bool) -> Result<(), SeedwatchError> {
    if is_dir {
        fs::symlink_dir(target, at).await?;
    } else {
        fs::symlink_file(target, at).await?;
    }
    Ok(())
}
