//! Persistence gateway
//!
//! Every call is its own transaction and is durable once it returns. The
//! `moved` flag and `storage_path` belong to the relocation lifecycle and
//! only change through [`TorrentStore::set_moved`] and
//! [`TorrentStore::set_storage_path`]; full-row writes leave them alone.

mod sqlite;

pub use sqlite::*;

use crate::error::SeedwatchError;
use async_trait::async_trait;
use seedwatch_types::{FeedSubscription, FeedSubscriptionSet, HashHistory, QueueState, TorrentRecord};
use std::path::Path;

/// Durable storage for records, the active queue, feeds and hash history
#[async_trait]
pub trait TorrentStore: Send + Sync {
    async fn fetch_all_records(&self) -> Result<Vec<TorrentRecord>, SeedwatchError>;

    async fn fetch_record(&self, hash: &str) -> Result<Option<TorrentRecord>, SeedwatchError>;

    /// Insert the record, or update an existing one. An update keeps the
    /// stored `moved` and `storage_path` columns.
    async fn update_record(&self, record: &TorrentRecord) -> Result<(), SeedwatchError>;

    /// Compare-and-set the moved flag. Returns false when the stored value
    /// was not `expected` or the record does not exist.
    async fn set_moved(&self, hash: &str, expected: bool, moved: bool)
        -> Result<bool, SeedwatchError>;

    async fn set_storage_path(&self, hash: &str, path: &Path) -> Result<(), SeedwatchError>;

    async fn fetch_queue_state(&self) -> Result<QueueState, SeedwatchError>;

    async fn update_queue_state(&self, queue: &QueueState) -> Result<(), SeedwatchError>;

    async fn fetch_feed_subscriptions(&self) -> Result<FeedSubscriptionSet, SeedwatchError>;

    /// Write every subscription in the set, items included, as one transaction
    async fn update_feed_subscriptions(
        &self,
        feeds: &FeedSubscriptionSet,
    ) -> Result<(), SeedwatchError>;

    /// Subscribe to a feed URL; returns the existing subscription if already present
    async fn add_feed_subscription(
        &self,
        url: &str,
        name: Option<&str>,
    ) -> Result<FeedSubscription, SeedwatchError>;

    async fn fetch_hash_history(&self) -> Result<HashHistory, SeedwatchError>;

    async fn record_hash(&self, hash: &str) -> Result<(), SeedwatchError>;
}
