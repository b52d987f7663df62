#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use seedwatch_core::{
    add_transfer, AddTransferRequest, FeedSource, FileOps, LiveTransfer, LocalFileOps,
    SeedwatchError, SessionEngine, SqliteStore, TorrentStore, TransferEngine, TransferHandle,
};
use seedwatch_types::{
    FeedItem, FeedSubscription, FeedSubscriptionSet, HashHistory, QueueState, Settings,
    TorrentOrigin, TorrentRecord,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Local file operations with scripted relocation results
#[derive(Default)]
pub struct ScriptedFs {
    local: LocalFileOps,
    pub moves: Mutex<Vec<(PathBuf, PathBuf)>>,
    pub fail_moves: Mutex<bool>,
    /// When set, moves wait for a notification before finishing
    pub hold: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedFs {
    pub fn failing() -> Self {
        let fs = Self::default();
        *fs.fail_moves.lock() = true;
        fs
    }

    pub fn move_count(&self) -> usize {
        self.moves.lock().len()
    }
}

#[async_trait]
impl FileOps for ScriptedFs {
    async fn copy(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
        self.local.copy(src, dst).await
    }

    async fn remove(&self, path: &Path) -> Result<(), SeedwatchError> {
        self.local.remove(path).await
    }

    async fn move_and_link_back(&self, src: &Path, dst: &Path) -> Result<(), SeedwatchError> {
        self.moves.lock().push((src.to_path_buf(), dst.to_path_buf()));
        let hold = self.hold.lock().clone();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        if *self.fail_moves.lock() {
            return Err(SeedwatchError::Relocation("disk full".to_string()));
        }
        Ok(())
    }
}

/// SQLite store whose next full scan can be held open, to interleave a
/// reconciliation tick with other writers
pub struct PausingStore {
    inner: Arc<SqliteStore>,
    armed: AtomicBool,
    /// Signalled once the held scan has read its records
    pub reached: Notify,
    pub resume: Notify,
}

impl PausingStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            reached: Notify::new(),
            resume: Notify::new(),
        }
    }

    pub fn pause_next_scan(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TorrentStore for PausingStore {
    async fn fetch_all_records(&self) -> Result<Vec<TorrentRecord>, SeedwatchError> {
        let records = self.inner.fetch_all_records().await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.resume.notified().await;
        }
        Ok(records)
    }

    async fn fetch_record(&self, hash: &str) -> Result<Option<TorrentRecord>, SeedwatchError> {
        self.inner.fetch_record(hash).await
    }

    async fn update_record(&self, record: &TorrentRecord) -> Result<(), SeedwatchError> {
        self.inner.update_record(record).await
    }

    async fn set_moved(
        &self,
        hash: &str,
        expected: bool,
        moved: bool,
    ) -> Result<bool, SeedwatchError> {
        self.inner.set_moved(hash, expected, moved).await
    }

    async fn set_storage_path(&self, hash: &str, path: &Path) -> Result<(), SeedwatchError> {
        self.inner.set_storage_path(hash, path).await
    }

    async fn fetch_queue_state(&self) -> Result<QueueState, SeedwatchError> {
        self.inner.fetch_queue_state().await
    }

    async fn update_queue_state(&self, queue: &QueueState) -> Result<(), SeedwatchError> {
        self.inner.update_queue_state(queue).await
    }

    async fn fetch_feed_subscriptions(&self) -> Result<FeedSubscriptionSet, SeedwatchError> {
        self.inner.fetch_feed_subscriptions().await
    }

    async fn update_feed_subscriptions(
        &self,
        feeds: &FeedSubscriptionSet,
    ) -> Result<(), SeedwatchError> {
        self.inner.update_feed_subscriptions(feeds).await
    }

    async fn add_feed_subscription(
        &self,
        url: &str,
        name: Option<&str>,
    ) -> Result<FeedSubscription, SeedwatchError> {
        self.inner.add_feed_subscription(url, name).await
    }

    async fn fetch_hash_history(&self) -> Result<HashHistory, SeedwatchError> {
        self.inner.fetch_hash_history().await
    }

    async fn record_hash(&self, hash: &str) -> Result<(), SeedwatchError> {
        self.inner.record_hash(hash).await
    }
}

/// Session engine that refuses to stop the listed hashes
pub struct StubbornEngine {
    inner: Arc<SessionEngine>,
    refuse_stop: HashSet<String>,
}

impl StubbornEngine {
    pub fn new(inner: Arc<SessionEngine>, refuse_stop: &[&str]) -> Self {
        Self {
            inner,
            refuse_stop: refuse_stop.iter().map(|h| h.to_string()).collect(),
        }
    }
}

#[async_trait]
impl TransferEngine for StubbornEngine {
    async fn list_active(&self) -> Result<Vec<LiveTransfer>, SeedwatchError> {
        self.inner.list_active().await
    }

    async fn add_from_file(&self, path: &Path) -> Result<LiveTransfer, SeedwatchError> {
        self.inner.add_from_file(path).await
    }

    async fn add_from_descriptor(&self, uri: &str) -> Result<LiveTransfer, SeedwatchError> {
        self.inner.add_from_descriptor(uri).await
    }

    async fn start(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        self.inner.start(handle).await
    }

    async fn stop(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        let refused = self
            .inner
            .list_active()
            .await?
            .iter()
            .any(|t| t.handle == *handle && self.refuse_stop.contains(&t.hash));
        if refused {
            return Err(SeedwatchError::Engine("session refused to stop".to_string()));
        }
        self.inner.stop(handle).await
    }

    async fn verify(&self, handle: &TransferHandle) -> Result<(), SeedwatchError> {
        self.inner.verify(handle).await
    }
}

/// Feed source serving canned items per URL; unknown URLs fail
#[derive(Default)]
pub struct ScriptedFeeds {
    feeds: HashMap<String, Vec<FeedItem>>,
}

impl ScriptedFeeds {
    pub fn with_feed(mut self, url: &str, items: Vec<FeedItem>) -> Self {
        self.feeds.insert(url.to_string(), items);
        self
    }
}

#[async_trait]
impl FeedSource for ScriptedFeeds {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, SeedwatchError> {
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| SeedwatchError::Feed(format!("{} unreachable", url)))
    }
}

pub fn item(title: &str, link: &str) -> FeedItem {
    FeedItem {
        title: title.to_string(),
        link: link.to_string(),
        published: None,
    }
}

pub fn magnet(hash: &str, name: &str) -> String {
    format!("magnet:?xt=urn:btih:{}&dn={}", hash, name)
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub settings: Arc<Settings>,
    pub store: Arc<SqliteStore>,
    pub engine: Arc<SessionEngine>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path());
        configure(&mut settings);
        for folder in [
            &settings.watch_folder,
            &settings.staging_folder,
            &settings.download_folder,
            &settings.default_move_folder,
        ] {
            tokio::fs::create_dir_all(folder).await.unwrap();
        }

        Self {
            dir,
            settings: Arc::new(settings),
            store: Arc::new(SqliteStore::in_memory().await.unwrap()),
            engine: Arc::new(SessionEngine::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn TorrentStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<dyn TransferEngine> {
        self.engine.clone()
    }

    /// Register a magnet with the engine and persist its record
    pub async fn add_magnet(&self, hash: &str, name: &str, total_size: u64) -> TorrentRecord {
        let mut live = self
            .engine
            .add_from_descriptor(&magnet(hash, name))
            .await
            .unwrap();
        self.engine.set_total_size(&live.hash, total_size);
        live.total_size = total_size;

        let request = AddTransferRequest::new(
            TorrentOrigin::Magnet,
            "RSS",
            self.settings.default_move_folder.clone(),
        );
        add_transfer(self.store.as_ref(), &live, request, &self.settings)
            .await
            .unwrap()
    }

    pub async fn record(&self, hash: &str) -> TorrentRecord {
        self.store.fetch_record(hash).await.unwrap().unwrap()
    }
}
