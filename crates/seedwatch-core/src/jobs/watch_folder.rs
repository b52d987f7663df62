//! Watch-folder importer
//!
//! Picks up descriptor files dropped into the watch folder, stages them and
//! registers them with the engine.

use crate::engine::TransferEngine;
use crate::error::SeedwatchError;
use crate::fsops::FileOps;
use crate::scheduler::ScheduledJob;
use crate::store::TorrentStore;
use crate::transfer::{add_transfer, AddTransferRequest};
use async_trait::async_trait;
use seedwatch_types::{Settings, TorrentOrigin};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Outcome of one watch-folder scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Directories and files with another extension
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} imported, {} failed, {} skipped",
            self.imported, self.failed, self.skipped
        )
    }
}

pub struct WatchFolderJob {
    store: Arc<dyn TorrentStore>,
    engine: Arc<dyn TransferEngine>,
    fs: Arc<dyn FileOps>,
    settings: Arc<Settings>,
}

impl WatchFolderJob {
    pub fn new(
        store: Arc<dyn TorrentStore>,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileOps>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            engine,
            fs,
            settings,
        }
    }

    /// Scan the watch folder once
    pub async fn tick(&self) -> Result<ImportReport, SeedwatchError> {
        let mut report = ImportReport::default();
        let watch_folder = &self.settings.watch_folder;

        let mut entries = match fs::read_dir(watch_folder).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read watch folder {}: {}", watch_folder.display(), e);
                return Err(e.into());
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !self.is_descriptor(&path) {
                debug!("Skipping {}", path.display());
                report.skipped += 1;
                continue;
            }

            if self.import(&path).await {
                report.imported += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.settings.descriptor_extension))
            .unwrap_or(false)
    }

    /// Import one descriptor file. Returns true when it was registered.
    async fn import(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name() else {
            return false;
        };
        let staged: PathBuf = self.settings.staging_folder.join(file_name);

        if let Err(e) = self.fs.copy(path, &staged).await {
            error!("Failed to stage {}: {}", path.display(), e);
            return false;
        }

        let live = match self.engine.add_from_file(&staged).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Could not add torrent {}: {}", path.display(), e);
                // Leave the original in place for the next scan
                if let Err(e) = self.fs.remove(&staged).await {
                    warn!("Failed to remove staged copy {}: {}", staged.display(), e);
                }
                return false;
            }
        };

        if let Err(e) = self.fs.remove(path).await {
            warn!("Failed to remove {} from watch folder: {}", path.display(), e);
        }

        let request = AddTransferRequest::new(
            TorrentOrigin::File,
            "default",
            self.settings.default_move_folder.clone(),
        )
        .with_source(staged.to_string_lossy());

        match add_transfer(self.store.as_ref(), &live, request, &self.settings).await {
            Ok(record) => {
                info!("Imported {} from watch folder as {}", record.name, record.hash);
                true
            }
            Err(e) => {
                error!("Failed to store transfer for {}: {}", path.display(), e);
                false
            }
        }
    }
}

#[async_trait]
impl ScheduledJob for WatchFolderJob {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn interval(&self) -> Duration {
        self.settings.watch_interval()
    }

    async fn run(&self) -> Result<(), SeedwatchError> {
        let report = self.tick().await?;
        if report.imported > 0 || report.failed > 0 {
            info!("Watch folder: {}", report);
        } else {
            debug!("Watch folder: nothing new");
        }
        Ok(())
    }
}
