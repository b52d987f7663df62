//! Feed importer
//!
//! Polls every subscribed feed and registers items that have not been seen
//! before. Duplicates are detected by content hash against the hash
//! history, and by link against the subscription's own item list.

use crate::descriptor::content_hash_from_link;
use crate::engine::TransferEngine;
use crate::error::SeedwatchError;
use crate::feed::FeedSource;
use crate::scheduler::ScheduledJob;
use crate::store::TorrentStore;
use crate::transfer::{add_transfer, AddTransferRequest};
use async_trait::async_trait;
use seedwatch_types::{
    FeedItem, FeedSubscription, FeedSubscriptionSet, HashHistory, Settings, TorrentOrigin,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one pass over all feeds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub feeds: usize,
    pub failed_feeds: usize,
    pub added: usize,
    pub skipped: usize,
    pub failures: usize,
}

impl fmt::Display for FeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} feeds ({} unreachable): {} added, {} skipped, {} failures",
            self.feeds, self.failed_feeds, self.added, self.skipped, self.failures
        )
    }
}

pub struct FeedImportJob {
    store: Arc<dyn TorrentStore>,
    engine: Arc<dyn TransferEngine>,
    source: Arc<dyn FeedSource>,
    settings: Arc<Settings>,
}

impl FeedImportJob {
    pub fn new(
        store: Arc<dyn TorrentStore>,
        engine: Arc<dyn TransferEngine>,
        source: Arc<dyn FeedSource>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            engine,
            source,
            settings,
        }
    }

    /// Poll every subscription once
    pub async fn tick(&self) -> Result<FeedReport, SeedwatchError> {
        let mut history = self.store.fetch_hash_history().await?;
        let subscriptions = self.store.fetch_feed_subscriptions().await?;

        let mut report = FeedReport {
            feeds: subscriptions.feeds.len(),
            ..FeedReport::default()
        };
        let mut seen_links: HashSet<String> = HashSet::new();
        let mut updated = FeedSubscriptionSet::default();

        for mut feed in subscriptions.feeds {
            let items = match self.source.fetch(&feed.url).await {
                Ok(items) => items,
                Err(e) => {
                    error!("Failed to fetch feed {}: {}", feed.url, e);
                    report.failed_feeds += 1;
                    updated.feeds.push(feed);
                    continue;
                }
            };
            debug!("Feed {} returned {} items", feed.url, items.len());

            for item in items {
                self.import_item(&mut feed, item, &mut history, &mut seen_links, &mut report)
                    .await;
            }
            updated.feeds.push(feed);
        }

        self.store.update_feed_subscriptions(&updated).await?;
        Ok(report)
    }

    async fn import_item(
        &self,
        feed: &mut FeedSubscription,
        item: FeedItem,
        history: &mut HashHistory,
        seen_links: &mut HashSet<String>,
        report: &mut FeedReport,
    ) {
        let key = content_hash_from_link(&item.link).unwrap_or_else(|| item.link.clone());

        if history.contains(&key) || seen_links.contains(&item.link) || feed.has_link(&item.link)
        {
            warn!("Torrent {} already added, skipping", item.title);
            report.skipped += 1;
            return;
        }

        let live = match self.engine.add_from_descriptor(&item.link).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Could not add torrent {} from feed: {}", item.title, e);
                report.failures += 1;
                return;
            }
        };

        let request = AddTransferRequest::new(
            TorrentOrigin::Magnet,
            "RSS",
            self.settings.default_move_folder.clone(),
        )
        .with_source(item.link.clone());

        match add_transfer(self.store.as_ref(), &live, request, &self.settings).await {
            Ok(record) => {
                info!("Added {} from feed {}", record.name, feed.url);
                history.insert(&record.hash);
                history.insert(&key);
                seen_links.insert(item.link.clone());
                feed.items.push(item);
                report.added += 1;
            }
            Err(e) => {
                error!("Failed to store transfer for {}: {}", item.title, e);
                report.failures += 1;
            }
        }
    }
}

#[async_trait]
impl ScheduledJob for FeedImportJob {
    fn name(&self) -> &'static str {
        "feeds"
    }

    fn interval(&self) -> Duration {
        self.settings.feed_interval()
    }

    async fn run(&self) -> Result<(), SeedwatchError> {
        let report = self.tick().await?;
        info!("Checked {}", report);
        Ok(())
    }
}
