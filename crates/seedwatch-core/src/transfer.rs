//! Shared "add transfer" operation used by every importer

use crate::engine::LiveTransfer;
use crate::error::SeedwatchError;
use crate::store::TorrentStore;
use seedwatch_types::{Settings, TorrentOrigin, TorrentRecord};
use std::path::PathBuf;
use tracing::info;

/// Where a freshly registered transfer came from and where it should end up
#[derive(Debug, Clone)]
pub struct AddTransferRequest {
    pub origin: TorrentOrigin,
    /// Staged descriptor path or magnet URI
    pub source: Option<String>,
    pub move_folder: PathBuf,
    pub label: String,
}

impl AddTransferRequest {
    pub fn new(origin: TorrentOrigin, label: impl Into<String>, move_folder: PathBuf) -> Self {
        Self {
            origin,
            source: None,
            move_folder,
            label: label.into(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Persist a record for a transfer the engine just registered.
///
/// Upserts by content hash: re-adding a known transfer refreshes its identity
/// fields (name, size, source, destination, label) but keeps its status,
/// moved flag, counters and timestamps. The hash is also added to the
/// hash history.
pub async fn add_transfer(
    store: &dyn TorrentStore,
    live: &LiveTransfer,
    request: AddTransferRequest,
    settings: &Settings,
) -> Result<TorrentRecord, SeedwatchError> {
    let record = match store.fetch_record(&live.hash).await? {
        Some(mut existing) => {
            if !live.name.is_empty() {
                existing.name = live.name.clone();
            }
            if live.total_size > 0 {
                existing.total_size = live.total_size;
            }
            if request.source.is_some() {
                existing.source = request.source;
            }
            existing.move_folder = request.move_folder;
            existing.label = request.label;
            info!("Transfer {} ({}) re-added, keeping its state", existing.name, existing.hash);
            existing
        }
        None => {
            let mut record = TorrentRecord::new(&live.hash, &live.name, request.origin);
            record.total_size = live.total_size;
            record.completed_bytes = live.bytes_completed;
            record.uploaded_bytes = live.bytes_uploaded;
            record.upload_limit = settings.upload_limit_default;
            record.source = request.source;
            record.storage_path = settings.download_folder.clone();
            record.move_folder = request.move_folder;
            record.label = request.label;
            info!(
                "Added transfer {} ({}) from {}",
                record.name,
                record.hash,
                record.origin.as_str()
            );
            record
        }
    };

    store.update_record(&record).await?;
    store.record_hash(&record.hash).await?;
    Ok(record)
}
