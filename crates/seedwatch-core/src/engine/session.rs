//! In-process transfer session
//!
//! Keeps the set of registered transfers, their counters and run state.
//! The wire protocol lives behind this registry; whatever drives the actual
//! piece transfer reports progress through [`SessionEngine::update_progress`].

use super::{LiveTransfer, TransferEngine, TransferHandle};
use crate::descriptor::parse_magnet;
use crate::error::SeedwatchError;
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Run state of a transfer inside the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, not started yet
    Idle,
    Running,
    Stopped,
}

/// Per-transfer bookkeeping exposed for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub state: SessionState,
    pub starts: u32,
    pub stops: u32,
    pub verifies: u32,
}

#[derive(Debug, Clone)]
struct SessionTransfer {
    live: LiveTransfer,
    stats: SessionStats,
}

/// Registry-backed [`TransferEngine`]
#[derive(Debug, Default)]
pub struct SessionEngine {
    /// Transfers keyed by content hash
    transfers: RwLock<HashMap<String, SessionTransfer>>,
}

impl SessionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer, or return the existing one for the same hash
    fn register(&self, hash: String, name: String) -> LiveTransfer {
        let mut transfers = self.transfers.write();
        if let Some(existing) = transfers.get(&hash) {
            debug!("Transfer {} already loaded, reusing handle", hash);
            return existing.live.clone();
        }

        let live = LiveTransfer {
            handle: TransferHandle::new(),
            hash: hash.clone(),
            name,
            total_size: 0,
            bytes_completed: 0,
            bytes_uploaded: 0,
        };
        transfers.insert(
            hash,
            SessionTransfer {
                live: live.clone(),
                stats: SessionStats {
                    state: SessionState::Idle,
                    starts: 0,
                    stops: 0,
                    verifies: 0,
                },
            },
        );
        live
    }

    fn with_handle<F>(&self, handle: &TransferHandle, f: F) -> Result<(), SeedwatchError>
    where
        F: FnOnce(&mut SessionTransfer),
    {
        let mut transfers = self.transfers.write();
        let transfer = transfers
            .values_mut()
            .find(|t| t.live.handle == *handle)
            .ok_or_else(|| SeedwatchError::NotFound(handle.to_string()))?;
        f(transfer);
        Ok(())
    }

    /// Record transfer progress reported by the wire layer
    pub fn update_progress(&self, hash: &str, completed: u64, uploaded: u64) -> bool {
        match self.transfers.write().get_mut(hash) {
            Some(transfer) => {
                transfer.live.bytes_completed = completed;
                transfer.live.bytes_uploaded = uploaded;
                true
            }
            None => false,
        }
    }

    /// Record the declared size once metadata is known
    pub fn set_total_size(&self, hash: &str, total_size: u64) -> bool {
        match self.transfers.write().get_mut(hash) {
            Some(transfer) => {
                transfer.live.total_size = total_size;
                true
            }
            None => false,
        }
    }

    /// Unload a transfer from the session
    pub fn unload(&self, hash: &str) -> Option<LiveTransfer> {
        self.transfers.write().remove(hash).map(|t| t.live)
    }

    pub fn stats(&self, hash: &str) -> Option<SessionStats> {
        self.transfers.read().get(hash).map(|t| t.stats.clone())
    }
}

#[async_trait]
impl TransferEngine for SessionEngine {
    async fn list_active(&self) -> Result<Vec<LiveTransfer>, SeedwatchError> {
        Ok(self
            .transfers
            .read()
            .values()
            .map(|t| t.live.clone())
            .collect())
    }

    async fn add_from_file(&self, path: &Path) -> Result<LiveTransfer, SeedwatchError> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(SeedwatchError::InvalidDescriptor(format!(
                "{} is empty",
                path.display()
            )));
        }

        let digest = Sha256::digest(&bytes);
        let hash: String = digest.iter().take(20).map(|b| format!("{:02x}", b)).collect();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| hash.clone());

        let live = self.register(hash, name);
        info!("Session loaded {} from {}", live.hash, path.display());
        Ok(live)
    }

    async fn add_from_descriptor(&self, uri: &str) -> Result<LiveTransfer, SeedwatchError> {
        let magnet = parse_magnet(uri)
            .ok_or_else(|| SeedwatchError::InvalidDescriptor(uri.to_string()))?;
        let name = magnet.name.unwrap_or_else(|| magnet.hash.clone());

        let live = self.register(magnet.hash, name);
        info!("Session loaded {} from magnet link", live.hash);
        Ok(live)
    }

    async fn start(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        self.with_handle(handle, |t| {
            t.stats.state = SessionState::Running;
            t.stats.starts += 1;
        })
    }

    async fn stop(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        self.with_handle(handle, |t| {
            t.stats.state = SessionState::Stopped;
            t.stats.stops += 1;
        })
    }

    async fn verify(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        self.with_handle(handle, |t| t.stats.verifies += 1)
    }
}
