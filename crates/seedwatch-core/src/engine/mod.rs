//! Transfer engine adapter
//!
//! The live torrent engine is owned elsewhere; the core only talks to it
//! through [`TransferEngine`]. Handles are ephemeral and never persisted:
//! every tick re-lists the live transfers and matches them by content hash.

mod session;

pub use session::*;

use crate::error::SeedwatchError;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Opaque reference to a transfer loaded in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle(Uuid);

impl TransferHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one transfer currently loaded in the engine
#[derive(Debug, Clone, PartialEq)]
pub struct LiveTransfer {
    pub handle: TransferHandle,
    /// Lowercase content hash
    pub hash: String,
    pub name: String,
    /// Declared size; 0 until metadata is known
    pub total_size: u64,
    pub bytes_completed: u64,
    pub bytes_uploaded: u64,
}

/// Operations the core needs from the live transfer engine
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// All transfers currently loaded
    async fn list_active(&self) -> Result<Vec<LiveTransfer>, SeedwatchError>;

    /// Register a transfer from a descriptor file on disk
    async fn add_from_file(&self, path: &Path) -> Result<LiveTransfer, SeedwatchError>;

    /// Register a transfer from a descriptor URI (magnet link)
    async fn add_from_descriptor(&self, uri: &str) -> Result<LiveTransfer, SeedwatchError>;

    /// Begin (or resume) transferring data
    async fn start(&self, handle: &TransferHandle) -> Result<(), SeedwatchError>;

    /// Halt transferring and seeding
    async fn stop(&self, handle: &TransferHandle) -> Result<(), SeedwatchError>;

    /// Re-check on-disk data against the transfer's pieces
    async fn verify(&self, handle: &TransferHandle) -> Result<(), SeedwatchError>;
}
