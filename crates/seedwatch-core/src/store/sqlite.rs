//! SQLite-based persistence for torrent records, queue state and feeds

use super::TorrentStore;
use crate::error::SeedwatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seedwatch_types::{
    normalize_hash, FeedItem, FeedSubscription, FeedSubscriptionSet, HashHistory, QueueState,
    TorrentOrigin, TorrentRecord, TorrentStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS torrents (
    hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    total_size INTEGER NOT NULL DEFAULT 0,
    uploaded_bytes INTEGER NOT NULL DEFAULT 0,
    completed_bytes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    upload_limit INTEGER NOT NULL DEFAULT 1,
    moved INTEGER NOT NULL DEFAULT 0,
    origin TEXT NOT NULL,
    source TEXT,
    storage_path TEXT NOT NULL,
    move_folder TEXT NOT NULL,
    label TEXT NOT NULL,
    added_at TEXT NOT NULL,
    activated_at TEXT
);

CREATE TABLE IF NOT EXISTS queue_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    active TEXT NOT NULL,
    max_active INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE IF NOT EXISTS feed_items (
    feed_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    published TEXT,
    PRIMARY KEY (feed_id, position),
    FOREIGN KEY (feed_id) REFERENCES feeds(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS hash_history (
    hash TEXT PRIMARY KEY,
    seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_torrents_status ON torrents(status);
"#;

/// Database connection pool for Seedwatch state
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, SeedwatchError> {
        let path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self, SeedwatchError> {
        // Every connection to :memory: is a separate database, so pin the pool to one
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, SeedwatchError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn load_items(&self) -> Result<HashMap<i64, Vec<FeedItem>>, SeedwatchError> {
        let rows = sqlx::query(
            "SELECT feed_id, title, link, published FROM feed_items ORDER BY feed_id, position",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<i64, Vec<FeedItem>> = HashMap::new();
        for row in rows {
            let feed_id: i64 = row.try_get("feed_id")?;
            items.entry(feed_id).or_default().push(FeedItem {
                title: row.try_get("title")?,
                link: row.try_get("link")?,
                published: row.try_get("published")?,
            });
        }
        Ok(items)
    }
}

#[async_trait]
impl TorrentStore for SqliteStore {
    async fn fetch_all_records(&self) -> Result<Vec<TorrentRecord>, SeedwatchError> {
        let rows = sqlx::query("SELECT * FROM torrents ORDER BY added_at, hash")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn fetch_record(&self, hash: &str) -> Result<Option<TorrentRecord>, SeedwatchError> {
        let row = sqlx::query("SELECT * FROM torrents WHERE hash = ?")
            .bind(normalize_hash(hash))
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_record).transpose()
    }

    async fn update_record(&self, record: &TorrentRecord) -> Result<(), SeedwatchError> {
        sqlx::query(
            r#"
            INSERT INTO torrents (
                hash, name, total_size, uploaded_bytes, completed_bytes, status,
                upload_limit, moved, origin, source, storage_path, move_folder,
                label, added_at, activated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET
                name = excluded.name,
                total_size = excluded.total_size,
                uploaded_bytes = excluded.uploaded_bytes,
                completed_bytes = excluded.completed_bytes,
                status = excluded.status,
                upload_limit = excluded.upload_limit,
                origin = excluded.origin,
                source = excluded.source,
                move_folder = excluded.move_folder,
                label = excluded.label,
                added_at = excluded.added_at,
                activated_at = excluded.activated_at
            "#,
        )
        .bind(normalize_hash(&record.hash))
        .bind(&record.name)
        .bind(record.total_size as i64)
        .bind(record.uploaded_bytes as i64)
        .bind(record.completed_bytes as i64)
        .bind(record.status.as_str())
        .bind(record.upload_limit)
        .bind(record.moved)
        .bind(record.origin.as_str())
        .bind(record.source.as_ref())
        .bind(record.storage_path.to_string_lossy().to_string())
        .bind(record.move_folder.to_string_lossy().to_string())
        .bind(&record.label)
        .bind(record.added_at.to_rfc3339())
        .bind(record.activated_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_moved(
        &self,
        hash: &str,
        expected: bool,
        moved: bool,
    ) -> Result<bool, SeedwatchError> {
        let result = sqlx::query("UPDATE torrents SET moved = ? WHERE hash = ? AND moved = ?")
            .bind(moved)
            .bind(normalize_hash(hash))
            .bind(expected)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_storage_path(&self, hash: &str, path: &Path) -> Result<(), SeedwatchError> {
        sqlx::query("UPDATE torrents SET storage_path = ? WHERE hash = ?")
            .bind(path.to_string_lossy().to_string())
            .bind(normalize_hash(hash))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_queue_state(&self) -> Result<QueueState, SeedwatchError> {
        let row = sqlx::query("SELECT active, max_active FROM queue_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(QueueState::default());
        };

        let active: String = row.try_get("active")?;
        Ok(QueueState {
            active: serde_json::from_str(&active)?,
            max_active: row.try_get::<i64, _>("max_active")? as usize,
        })
    }

    async fn update_queue_state(&self, queue: &QueueState) -> Result<(), SeedwatchError> {
        sqlx::query(
            r#"
            INSERT INTO queue_state (id, active, max_active) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                active = excluded.active,
                max_active = excluded.max_active
            "#,
        )
        .bind(serde_json::to_string(&queue.active)?)
        .bind(queue.max_active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_feed_subscriptions(&self) -> Result<FeedSubscriptionSet, SeedwatchError> {
        let rows = sqlx::query("SELECT id, url, name FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut items = self.load_items().await?;

        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            feeds.push(FeedSubscription {
                id,
                url: row.try_get("url")?,
                name: row.try_get("name")?,
                items: items.remove(&id).unwrap_or_default(),
            });
        }

        Ok(FeedSubscriptionSet { feeds })
    }

    async fn update_feed_subscriptions(
        &self,
        feeds: &FeedSubscriptionSet,
    ) -> Result<(), SeedwatchError> {
        let mut tx = self.pool.begin().await?;

        for feed in &feeds.feeds {
            sqlx::query(
                r#"
                INSERT INTO feeds (id, url, name) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET url = excluded.url, name = excluded.name
                "#,
            )
            .bind(feed.id)
            .bind(&feed.url)
            .bind(feed.name.as_ref())
            .execute(&mut *tx)
            .await?;

            // Replace the item list wholesale; positions keep insertion order
            sqlx::query("DELETE FROM feed_items WHERE feed_id = ?")
                .bind(feed.id)
                .execute(&mut *tx)
                .await?;

            for (position, item) in feed.items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO feed_items (feed_id, position, title, link, published)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(feed.id)
                .bind(position as i64)
                .bind(&item.title)
                .bind(&item.link)
                .bind(item.published.as_ref())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_feed_subscription(
        &self,
        url: &str,
        name: Option<&str>,
    ) -> Result<FeedSubscription, SeedwatchError> {
        sqlx::query("INSERT INTO feeds (url, name) VALUES (?, ?) ON CONFLICT(url) DO NOTHING")
            .bind(url)
            .bind(name)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT id, url, name FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        let id: i64 = row.try_get("id")?;

        let items = self.load_items().await?.remove(&id).unwrap_or_default();
        Ok(FeedSubscription {
            id,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            items,
        })
    }

    async fn fetch_hash_history(&self) -> Result<HashHistory, SeedwatchError> {
        let rows = sqlx::query("SELECT hash FROM hash_history")
            .fetch_all(&self.pool)
            .await?;

        let mut history = HashHistory::default();
        for row in rows {
            let hash: String = row.try_get("hash")?;
            history.insert(&hash);
        }
        Ok(history)
    }

    async fn record_hash(&self, hash: &str) -> Result<(), SeedwatchError> {
        sqlx::query("INSERT INTO hash_history (hash, seen_at) VALUES (?, ?) ON CONFLICT(hash) DO NOTHING")
            .bind(normalize_hash(hash))
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Convert a database row to a TorrentRecord
fn row_to_record(row: SqliteRow) -> Result<TorrentRecord, SeedwatchError> {
    let status: String = row.try_get("status")?;
    let origin: String = row.try_get("origin")?;

    Ok(TorrentRecord {
        hash: row.try_get("hash")?,
        name: row.try_get("name")?,
        total_size: row.try_get::<i64, _>("total_size")? as u64,
        uploaded_bytes: row.try_get::<i64, _>("uploaded_bytes")? as u64,
        completed_bytes: row.try_get::<i64, _>("completed_bytes")? as u64,
        status: TorrentStatus::from_str(&status).map_err(SeedwatchError::Serialization)?,
        upload_limit: row.try_get("upload_limit")?,
        moved: row.try_get("moved")?,
        origin: TorrentOrigin::from_str(&origin).map_err(SeedwatchError::Serialization)?,
        source: row.try_get("source")?,
        storage_path: PathBuf::from(row.try_get::<String, _>("storage_path")?),
        move_folder: PathBuf::from(row.try_get::<String, _>("move_folder")?),
        label: row.try_get("label")?,
        added_at: parse_timestamp(&row.try_get::<String, _>("added_at")?)?,
        activated_at: row
            .try_get::<Option<String>, _>("activated_at")?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SeedwatchError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SeedwatchError::Serialization(e.to_string()))
}
