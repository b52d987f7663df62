//! Seedwatch Core - periodic reconciliation engine
//!
//! This crate keeps a persisted view of torrent state in sync with a live
//! transfer engine. It imports new transfers from a watch folder and from
//! subscribed feeds, enforces the active-queue and seed-ratio policies, and
//! relocates completed data.

mod descriptor;
mod engine;
mod error;
mod feed;
mod fsops;
mod jobs;
mod relocate;
mod scheduler;
mod settings;
mod store;
mod transfer;

pub use descriptor::*;
pub use engine::*;
pub use error::{Result, SeedwatchError};
pub use feed::*;
pub use fsops::*;
pub use jobs::*;
pub use relocate::*;
pub use scheduler::*;
pub use settings::*;
pub use store::*;
pub use transfer::*;

use seedwatch_types::Settings;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DATABASE_FILE: &str = "seedwatch.db";

/// The main Seedwatch core instance
pub struct SeedwatchCore {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn TorrentStore>,
    pub engine: Arc<dyn TransferEngine>,
    pub fs: Arc<dyn FileOps>,
    pub feeds: Arc<dyn FeedSource>,
    pub relocations: Arc<RelocationPool>,
    scheduler: Scheduler,
}

impl SeedwatchCore {
    /// Open the database in `data_dir` and wire the default collaborators
    pub async fn open(data_dir: &Path, settings: Settings) -> Result<Self> {
        let store = SqliteStore::open(data_dir.join(DATABASE_FILE)).await?;
        Self::with_parts(
            settings,
            Arc::new(store),
            Arc::new(SessionEngine::new()),
            Arc::new(LocalFileOps::new()),
            Arc::new(HttpFeedSource::new()?),
        )
        .await
    }

    /// Wire a core from explicit collaborators
    pub async fn with_parts(
        settings: Settings,
        store: Arc<dyn TorrentStore>,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileOps>,
        feeds: Arc<dyn FeedSource>,
    ) -> Result<Self> {
        settings.validate().map_err(SeedwatchError::Config)?;

        for folder in [
            &settings.watch_folder,
            &settings.staging_folder,
            &settings.download_folder,
            &settings.default_move_folder,
        ] {
            tokio::fs::create_dir_all(folder).await?;
        }

        let relocations = Arc::new(RelocationPool::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&fs),
            settings.max_concurrent_relocations,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            store,
            engine,
            fs,
            feeds,
            relocations,
            scheduler: Scheduler::start(),
        })
    }

    pub fn watch_folder_job(&self) -> WatchFolderJob {
        WatchFolderJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.fs),
            Arc::clone(&self.settings),
        )
    }

    pub fn reconcile_job(&self) -> ReconcileJob {
        ReconcileJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.relocations),
            Arc::clone(&self.settings),
        )
    }

    pub fn feed_import_job(&self) -> FeedImportJob {
        FeedImportJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.feeds),
            Arc::clone(&self.settings),
        )
    }

    /// Put all three jobs on their timers
    pub fn start_jobs(&self) -> Result<()> {
        self.scheduler.schedule(Arc::new(self.watch_folder_job()))?;
        self.scheduler.schedule(Arc::new(self.reconcile_job()))?;
        self.scheduler.schedule(Arc::new(self.feed_import_job()))?;
        Ok(())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop the timers and wait for in-flight relocations
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.relocations.drain().await;
        info!("Seedwatch core stopped");
    }
}
