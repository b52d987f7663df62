//! Relocation pool - moves completed data off the reconciliation path
//!
//! Each relocation runs as a detached task so a slow move never delays the
//! next tick. A semaphore caps how many moves run at once. The caller must
//! have claimed the record with [`TorrentStore::set_moved`] before
//! submitting.

use crate::engine::{TransferEngine, TransferHandle};
use crate::error::SeedwatchError;
use crate::fsops::FileOps;
use crate::store::TorrentStore;
use seedwatch_types::TorrentRecord;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// One completed transfer to move
#[derive(Debug, Clone)]
pub struct RelocationJob {
    pub hash: String,
    pub name: String,
    /// Current data location
    pub source: PathBuf,
    /// Final data location
    pub destination: PathBuf,
    /// Folder the data lives in after a successful move
    pub move_folder: PathBuf,
    /// Live handle to re-verify if the move fails
    pub handle: Option<TransferHandle>,
}

impl RelocationJob {
    /// `None` when the record's name cannot address its data
    pub fn for_record(record: &TorrentRecord, handle: Option<TransferHandle>) -> Option<Self> {
        let (source, destination) = record.relocation_paths()?;
        Some(Self {
            hash: record.hash.clone(),
            name: record.name.clone(),
            source,
            destination,
            move_folder: record.move_folder.clone(),
            handle,
        })
    }
}

/// Bounded pool of detached relocation tasks
pub struct RelocationPool {
    store: Arc<dyn TorrentStore>,
    engine: Arc<dyn TransferEngine>,
    fs: Arc<dyn FileOps>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl RelocationPool {
    pub fn new(
        store: Arc<dyn TorrentStore>,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileOps>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            engine,
            fs,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a relocation; returns immediately
    pub fn submit(&self, job: RelocationJob) {
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let fs = Arc::clone(&self.fs);
        let permits = Arc::clone(&self.permits);

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            relocate(store.as_ref(), engine.as_ref(), fs.as_ref(), job).await;
        });
    }

    /// Number of relocations queued or running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every submitted relocation to finish
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn relocate(
    store: &dyn TorrentStore,
    engine: &dyn TransferEngine,
    fs: &dyn FileOps,
    job: RelocationJob,
) {
    info!(
        "Torrent {} completed, moving {} to {}",
        job.name,
        job.source.display(),
        job.destination.display()
    );

    match fs.move_and_link_back(&job.source, &job.destination).await {
        Ok(()) => {
            if let Err(e) = finish(store, &job).await {
                error!("Moved {} but failed to record its new location: {}", job.name, e);
            }
        }
        Err(e) => {
            error!("Failed to move torrent {}: {}", job.name, e);
            if let Some(handle) = job.handle {
                if let Err(e) = engine.verify(&handle).await {
                    warn!("Failed to start data verification for {}: {}", job.name, e);
                }
            }
            if let Err(e) = release(store, &job).await {
                error!("Failed to reset moved flag for {}: {}", job.name, e);
            }
        }
    }
}

/// Point the record at the new data location
async fn finish(store: &dyn TorrentStore, job: &RelocationJob) -> Result<(), SeedwatchError> {
    store.set_storage_path(&job.hash, &job.move_folder).await?;
    info!("Torrent {} relocated to {}", job.name, job.destination.display());
    Ok(())
}

/// Clear the moved flag so a later tick retries
async fn release(store: &dyn TorrentStore, job: &RelocationJob) -> Result<(), SeedwatchError> {
    if !store.set_moved(&job.hash, true, false).await? {
        warn!("Torrent {} was not claimed when its move failed", job.name);
    }
    Ok(())
}
