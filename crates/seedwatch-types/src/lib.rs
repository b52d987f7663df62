//! Shared types for Seedwatch
//!
//! This crate contains the persisted data model shared by the core
//! library and the daemon binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Torrent Types
// ============================================================================

/// Persisted view of one transfer, keyed by its content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Lowercase content hash (info-hash); unique per record
    pub hash: String,
    pub name: String,
    /// Declared total size in bytes
    pub total_size: u64,
    pub uploaded_bytes: u64,
    /// Last completed-bytes snapshot seen on the live transfer
    pub completed_bytes: u64,
    pub status: TorrentStatus,
    /// Whether the seeding ratio stop applies to this transfer
    pub upload_limit: bool,
    /// Set once post-completion relocation has been claimed
    pub moved: bool,
    pub origin: TorrentOrigin,
    /// Descriptor path or magnet URI the transfer was added from
    pub source: Option<String>,
    /// Folder the data currently lives in
    pub storage_path: PathBuf,
    /// Folder completed data is relocated to
    pub move_folder: PathBuf,
    pub label: String,
    pub added_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl TorrentRecord {
    pub fn new(hash: impl Into<String>, name: impl Into<String>, origin: TorrentOrigin) -> Self {
        Self {
            hash: normalize_hash(&hash.into()),
            name: name.into(),
            total_size: 0,
            uploaded_bytes: 0,
            completed_bytes: 0,
            status: TorrentStatus::Queued,
            upload_limit: true,
            moved: false,
            origin,
            source: None,
            storage_path: PathBuf::new(),
            move_folder: PathBuf::new(),
            label: "default".to_string(),
            added_at: Utc::now(),
            activated_at: None,
        }
    }

    /// Uploaded/completed ratio, or `None` while nothing has completed yet
    pub fn seed_ratio(&self) -> Option<f64> {
        if self.completed_bytes == 0 {
            return None;
        }
        Some(self.uploaded_bytes as f64 / self.completed_bytes as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.total_size > 0 && self.completed_bytes == self.total_size
    }

    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.completed_bytes as f64 / self.total_size as f64) * 100.0
    }

    /// Current and final data locations, or `None` when the name is not a
    /// single path component and joining it would address the folder itself
    pub fn relocation_paths(&self) -> Option<(PathBuf, PathBuf)> {
        let mut components = Path::new(&self.name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some((
                self.storage_path.join(&self.name),
                self.move_folder.join(&self.name),
            )),
            _ => None,
        }
    }
}

/// Lifecycle status of a persisted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentStatus {
    Queued,
    Active,
    Stopped,
    Completed,
}

impl TorrentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentStatus::Queued => "queued",
            TorrentStatus::Active => "active",
            TorrentStatus::Stopped => "stopped",
            TorrentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TorrentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(TorrentStatus::Queued),
            "active" => Ok(TorrentStatus::Active),
            "stopped" => Ok(TorrentStatus::Stopped),
            "completed" => Ok(TorrentStatus::Completed),
            other => Err(format!("Invalid torrent status: {}", other)),
        }
    }
}

/// How a transfer entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentOrigin {
    File,
    Magnet,
    Manual,
}

impl TorrentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentOrigin::File => "file",
            TorrentOrigin::Magnet => "magnet",
            TorrentOrigin::Manual => "manual",
        }
    }
}

impl FromStr for TorrentOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(TorrentOrigin::File),
            "magnet" => Ok(TorrentOrigin::Magnet),
            "manual" => Ok(TorrentOrigin::Manual),
            other => Err(format!("Invalid torrent origin: {}", other)),
        }
    }
}

/// Content hashes are compared case-insensitively; store them lowercase
pub fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

// ============================================================================
// Queue Types
// ============================================================================

/// The process-wide active queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Active content hashes, oldest activation first
    pub active: Vec<String>,
    /// Configured capacity
    pub max_active: usize,
}

impl QueueState {
    pub fn new(max_active: usize) -> Self {
        Self {
            active: Vec::new(),
            max_active,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.max_active
    }

    pub fn is_active(&self, hash: &str) -> bool {
        self.active.iter().any(|h| h == hash)
    }

    /// Append to the back of the active list; returns false if already present
    pub fn activate(&mut self, hash: &str) -> bool {
        if self.is_active(hash) {
            return false;
        }
        self.active.push(hash.to_string());
        true
    }

    /// Remove from the active list; returns true if it was present
    pub fn deactivate(&mut self, hash: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|h| h != hash);
        self.active.len() != before
    }

    /// Number of entries above capacity
    pub fn overflow(&self) -> usize {
        self.active.len().saturating_sub(self.max_active)
    }
}

// ============================================================================
// Feed Types
// ============================================================================

/// One item seen on a subscribed feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<String>,
}

/// A polled feed and the items already taken from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub id: i64,
    pub url: String,
    pub name: Option<String>,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

impl FeedSubscription {
    pub fn has_link(&self, link: &str) -> bool {
        self.items.iter().any(|item| item.link == link)
    }
}

/// Every feed subscription, written back as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSubscriptionSet {
    pub feeds: Vec<FeedSubscription>,
}

/// Content hashes already seen by the importers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashHistory {
    pub hashes: BTreeSet<String>,
}

impl HashHistory {
    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(&normalize_hash(hash))
    }

    pub fn insert(&mut self, hash: &str) -> bool {
        self.hashes.insert(normalize_hash(hash))
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder polled for new descriptor files
    pub watch_folder: PathBuf,
    /// Folder descriptor files are kept in after import
    pub staging_folder: PathBuf,
    /// Folder the engine downloads into
    pub download_folder: PathBuf,
    /// Default relocation folder for completed data
    pub default_move_folder: PathBuf,
    /// Extension marking a descriptor file, without the dot
    pub descriptor_extension: String,
    /// Uploaded/completed ratio at which seeding stops
    pub seed_ratio_stop: f64,
    pub max_active_transfers: usize,
    /// Upload-limit flag given to newly added transfers
    pub upload_limit_default: bool,
    pub max_concurrent_relocations: usize,
    pub watch_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub feed_interval_secs: u64,
}

impl Settings {
    /// Default settings rooted at a data directory
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            watch_folder: data_dir.join("watch"),
            staging_folder: data_dir.join("uploads"),
            download_folder: data_dir.join("downloads"),
            default_move_folder: data_dir.join("completed"),
            ..Self::default()
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_secs(self.feed_interval_secs)
    }

    /// Check the values the jobs rely on
    pub fn validate(&self) -> Result<(), String> {
        if !self.seed_ratio_stop.is_finite() || self.seed_ratio_stop <= 0.0 {
            return Err(format!(
                "seed_ratio_stop must be a positive number, got {}",
                self.seed_ratio_stop
            ));
        }
        if self.max_active_transfers == 0 {
            return Err("max_active_transfers must be at least 1".to_string());
        }
        if self.max_concurrent_relocations == 0 {
            return Err("max_concurrent_relocations must be at least 1".to_string());
        }
        if self.watch_interval_secs == 0
            || self.reconcile_interval_secs == 0
            || self.feed_interval_secs == 0
        {
            return Err("job intervals must be non-zero".to_string());
        }
        if self.descriptor_extension.trim_start_matches('.').is_empty() {
            return Err("descriptor_extension must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            watch_folder: data_dir.join("watch"),
            staging_folder: data_dir.join("uploads"),
            download_folder: data_dir.join("downloads"),
            default_move_folder: data_dir.join("completed"),
            descriptor_extension: "torrent".to_string(),
            seed_ratio_stop: 1.0,
            max_active_transfers: 5,
            upload_limit_default: true,
            max_concurrent_relocations: 2,
            watch_interval_secs: 300,
            reconcile_interval_secs: 30,
            feed_interval_secs: 3600,
        }
    }
}

/// Platform data directory for Seedwatch
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("seedwatch"))
        .unwrap_or_else(|| PathBuf::from(".seedwatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_needs_a_plain_name() {
        let mut record = TorrentRecord::new("ABC", "show", TorrentOrigin::File);
        record.storage_path = PathBuf::from("/data/downloads");
        record.move_folder = PathBuf::from("/data/completed");
        assert_eq!(
            record.relocation_paths(),
            Some((
                PathBuf::from("/data/downloads/show"),
                PathBuf::from("/data/completed/show")
            ))
        );

        for name in ["", ".", "..", "a/b", "/"] {
            record.name = name.to_string();
            assert_eq!(record.relocation_paths(), None, "name {:?}", name);
        }
    }

    #[test]
    fn seed_ratio_guards_zero_completed() {
        let mut record = TorrentRecord::new("ABC", "demo", TorrentOrigin::File);
        record.uploaded_bytes = 600;
        assert_eq!(record.seed_ratio(), None);

        record.completed_bytes = 500;
        assert_eq!(record.seed_ratio(), Some(1.2));
        assert_eq!(record.hash, "abc");
    }

    #[test]
    fn queue_state_tracks_order_and_overflow() {
        let mut queue = QueueState::new(2);
        assert!(queue.activate("a"));
        assert!(queue.activate("b"));
        assert!(!queue.activate("a"));
        assert!(!queue.has_capacity());

        queue.active.push("c".to_string());
        assert_eq!(queue.overflow(), 1);
        assert!(queue.deactivate("a"));
        assert_eq!(queue.active, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn settings_validation_rejects_bad_values() {
        let mut settings = Settings::with_data_dir(Path::new("/tmp/sw"));
        assert!(settings.validate().is_ok());
        assert_eq!(settings.watch_folder, PathBuf::from("/tmp/sw/watch"));

        settings.seed_ratio_stop = f64::NAN;
        assert!(settings.validate().is_err());

        settings.seed_ratio_stop = 2.0;
        settings.max_active_transfers = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_fill_missing_fields_from_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "seed_ratio_stop": 2.5, "max_active_transfers": 3 }"#)
                .unwrap();
        assert_eq!(settings.seed_ratio_stop, 2.5);
        assert_eq!(settings.max_active_transfers, 3);
        assert_eq!(settings.reconcile_interval_secs, 30);
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!("Stopped".parse::<TorrentStatus>(), Ok(TorrentStatus::Stopped));
        assert!("paused".parse::<TorrentStatus>().is_err());
    }
}
