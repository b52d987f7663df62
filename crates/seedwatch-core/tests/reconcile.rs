mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{Harness, PausingStore, ScriptedFs, StubbornEngine};
use seedwatch_core::{FileOps, ReconcileJob, RelocationPool, TorrentStore, TransferEngine};
use seedwatch_types::{QueueState, TorrentStatus};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_test::assert_ok;

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const HASH_C: &str = "cccccccccccccccccccccccccccccccccccccccc";
const HASH_D: &str = "dddddddddddddddddddddddddddddddddddddddd";

fn reconciler(harness: &Harness, fs: Arc<ScriptedFs>) -> (ReconcileJob, Arc<RelocationPool>) {
    let fs: Arc<dyn FileOps> = fs;
    let pool = Arc::new(RelocationPool::new(
        harness.store(),
        harness.engine(),
        fs,
        harness.settings.max_concurrent_relocations,
    ));
    let job = ReconcileJob::new(
        harness.store(),
        harness.engine(),
        pool.clone(),
        harness.settings.clone(),
    );
    (job, pool)
}

/// Reconciler over a store whose scans can be held, with moves held until notified
fn held_reconciler(
    harness: &Harness,
    fs: Arc<ScriptedFs>,
) -> (Arc<ReconcileJob>, Arc<RelocationPool>, Arc<PausingStore>, Arc<Notify>) {
    let store = Arc::new(PausingStore::new(harness.store.clone()));
    let hold = Arc::new(Notify::new());
    *fs.hold.lock() = Some(hold.clone());

    let fs: Arc<dyn FileOps> = fs;
    let pool = Arc::new(RelocationPool::new(
        store.clone(),
        harness.engine(),
        fs,
        harness.settings.max_concurrent_relocations,
    ));
    let job = Arc::new(ReconcileJob::new(
        store.clone(),
        harness.engine(),
        pool.clone(),
        harness.settings.clone(),
    ));
    (job, pool, store, hold)
}

#[tokio::test]
async fn ratio_stop_happens_once() {
    let harness = Harness::new().await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 500, 600);

    let first = assert_ok!(job.tick().await);
    assert_eq!(first.stopped, 1);
    assert_eq!(harness.record(HASH_A).await.status, TorrentStatus::Stopped);

    let second = assert_ok!(job.tick().await);
    assert_eq!(second.stopped, 0);
    assert_eq!(harness.engine.stats(HASH_A).unwrap().stops, 1);

    let queue = harness.store.fetch_queue_state().await.unwrap();
    assert!(!queue.is_active(HASH_A));
}

#[tokio::test]
async fn no_ratio_stop_without_upload_limit() {
    let harness = Harness::with_settings(|s| s.upload_limit_default = false).await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 500, 600);

    let report = job.tick().await.unwrap();
    assert_eq!(report.stopped, 0);
    assert_eq!(report.promoted, 1);

    let record = harness.record(HASH_A).await;
    assert_eq!(record.status, TorrentStatus::Active);
    assert_eq!(record.uploaded_bytes, 600);
    assert_eq!(harness.engine.stats(HASH_A).unwrap().stops, 0);
}

#[tokio::test]
async fn zero_completed_bytes_never_stops() {
    let harness = Harness::new().await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 0, 600);

    let report = job.tick().await.unwrap();
    assert_eq!(report.stopped, 0);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn completion_relocates_exactly_once() {
    let harness = Harness::new().await;
    let fs = Arc::new(ScriptedFs::default());
    let (job, pool) = reconciler(&harness, fs.clone());

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 1000, 0);

    let first = job.tick().await.unwrap();
    assert_eq!(first.relocations, 1);
    let claimed = harness.record(HASH_A).await;
    assert!(claimed.moved);
    assert_eq!(claimed.status, TorrentStatus::Completed);

    let second = job.tick().await.unwrap();
    assert_eq!(second.relocations, 0);

    pool.drain().await;
    assert_eq!(fs.move_count(), 1);

    let (src, dst) = fs.moves.lock()[0].clone();
    assert_eq!(src, harness.settings.download_folder.join("show"));
    assert_eq!(dst, harness.settings.default_move_folder.join("show"));

    let record = harness.record(HASH_A).await;
    assert!(record.moved);
    assert_eq!(record.storage_path, harness.settings.default_move_folder);
}

#[tokio::test]
async fn failed_relocation_verifies_and_releases_the_claim() {
    let harness = Harness::new().await;
    let fs = Arc::new(ScriptedFs::failing());
    let (job, pool) = reconciler(&harness, fs.clone());

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 1000, 0);

    job.tick().await.unwrap();
    pool.drain().await;

    assert_eq!(harness.engine.stats(HASH_A).unwrap().verifies, 1);
    let record = harness.record(HASH_A).await;
    assert!(!record.moved);
    assert_eq!(record.storage_path, harness.settings.download_folder);

    // The next tick claims it again
    let retry = job.tick().await.unwrap();
    assert_eq!(retry.relocations, 1);
    pool.drain().await;
    assert_eq!(fs.move_count(), 2);
}

#[tokio::test]
async fn admission_respects_capacity() {
    let harness = Harness::with_settings(|s| s.max_active_transfers = 2).await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    for hash in [HASH_A, HASH_B, HASH_C, HASH_D] {
        harness.add_magnet(hash, hash, 1000).await;
    }

    let report = job.tick().await.unwrap();
    assert_eq!(report.promoted, 2);

    let queue = harness.store.fetch_queue_state().await.unwrap();
    assert_eq!(queue.active.len(), 2);

    let active = harness
        .store
        .fetch_all_records()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == TorrentStatus::Active)
        .count();
    assert_eq!(active, 2);

    // Started in the engine as well
    let started: u32 = [HASH_A, HASH_B, HASH_C, HASH_D]
        .iter()
        .map(|h| harness.engine.stats(h).unwrap().starts)
        .sum();
    assert_eq!(started, 2);
}

#[tokio::test]
async fn overflow_demotes_the_oldest_activation() {
    let harness = Harness::with_settings(|s| s.max_active_transfers = 2).await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    let now = Utc::now();
    for (i, hash) in [HASH_A, HASH_B, HASH_C].iter().enumerate() {
        let mut record = harness.add_magnet(hash, hash, 1000).await;
        record.status = TorrentStatus::Active;
        record.activated_at = Some(now - ChronoDuration::minutes(10 - i as i64));
        harness.store.update_record(&record).await.unwrap();
    }
    let mut queue = QueueState::new(3);
    for hash in [HASH_A, HASH_B, HASH_C] {
        queue.activate(hash);
    }
    harness.store.update_queue_state(&queue).await.unwrap();

    let report = job.tick().await.unwrap();
    assert_eq!(report.demoted, 1);

    let queue = harness.store.fetch_queue_state().await.unwrap();
    assert_eq!(queue.active, vec![HASH_B.to_string(), HASH_C.to_string()]);

    let demoted = harness.record(HASH_A).await;
    assert_eq!(demoted.status, TorrentStatus::Queued);
    assert_eq!(demoted.activated_at, None);
    assert_eq!(harness.engine.stats(HASH_A).unwrap().stops, 1);
}

#[tokio::test]
async fn records_without_a_live_transfer_are_tolerated() {
    let harness = Harness::new().await;
    let (job, _pool) = reconciler(&harness, Arc::new(ScriptedFs::default()));

    let record = harness.add_magnet(HASH_A, "gone", 1000).await;
    harness.engine.unload(HASH_A);

    let report = job.tick().await.unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(report.relocations, 0);
    assert_eq!(harness.record(HASH_A).await.completed_bytes, record.completed_bytes);
}

#[tokio::test]
async fn released_claim_is_not_overwritten_by_a_concurrent_tick() {
    let harness = Harness::new().await;
    let fs = Arc::new(ScriptedFs::failing());
    let (job, pool, store, hold) = held_reconciler(&harness, fs.clone());

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 1000, 0);
    assert_eq!(job.tick().await.unwrap().relocations, 1);

    // The second tick reads the claimed record, then the move fails under it
    harness.engine.update_progress(HASH_A, 1000, 250);
    store.pause_next_scan();
    let second = tokio::spawn({
        let job = job.clone();
        async move { job.tick().await }
    });
    store.reached.notified().await;

    hold.notify_one();
    pool.drain().await;
    assert!(!harness.record(HASH_A).await.moved);

    store.resume.notify_one();
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.relocations, 0);

    let record = harness.record(HASH_A).await;
    assert!(!record.moved);
    assert_eq!(record.uploaded_bytes, 250);

    // Released, so the next tick retries
    *fs.hold.lock() = None;
    let third = job.tick().await.unwrap();
    assert_eq!(third.relocations, 1);
    pool.drain().await;
    assert_eq!(fs.move_count(), 2);
}

#[tokio::test]
async fn relocated_path_is_not_overwritten_by_a_concurrent_tick() {
    let harness = Harness::new().await;
    let fs = Arc::new(ScriptedFs::default());
    let (job, pool, store, hold) = held_reconciler(&harness, fs.clone());

    harness.add_magnet(HASH_A, "show", 1000).await;
    harness.engine.update_progress(HASH_A, 1000, 0);
    job.tick().await.unwrap();

    harness.engine.update_progress(HASH_A, 1000, 250);
    store.pause_next_scan();
    let second = tokio::spawn({
        let job = job.clone();
        async move { job.tick().await }
    });
    store.reached.notified().await;

    hold.notify_one();
    pool.drain().await;
    store.resume.notify_one();
    second.await.unwrap().unwrap();

    let record = harness.record(HASH_A).await;
    assert!(record.moved);
    assert_eq!(record.uploaded_bytes, 250);
    assert_eq!(record.storage_path, harness.settings.default_move_folder);
    assert_eq!(fs.move_count(), 1);
}

#[tokio::test]
async fn one_failing_record_does_not_hold_back_the_others() {
    let harness = Harness::with_settings(|s| s.max_active_transfers = 3).await;
    let engine: Arc<dyn TransferEngine> =
        Arc::new(StubbornEngine::new(harness.engine.clone(), &[HASH_A]));
    let fs: Arc<dyn FileOps> = Arc::new(ScriptedFs::default());
    let pool = Arc::new(RelocationPool::new(
        harness.store(),
        engine.clone(),
        fs,
        harness.settings.max_concurrent_relocations,
    ));
    let job = ReconcileJob::new(harness.store(), engine, pool, harness.settings.clone());

    harness.add_magnet(HASH_A, "first", 1000).await;
    harness.add_magnet(HASH_B, "second", 1000).await;
    harness.add_magnet(HASH_C, "third", 1000).await;
    harness.engine.update_progress(HASH_A, 500, 600);
    harness.engine.update_progress(HASH_B, 500, 600);

    let report = job.tick().await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.stopped, 1);

    assert_ne!(harness.record(HASH_A).await.status, TorrentStatus::Stopped);
    assert_eq!(harness.record(HASH_B).await.status, TorrentStatus::Stopped);
    assert_eq!(harness.record(HASH_C).await.status, TorrentStatus::Active);
    assert_eq!(harness.engine.stats(HASH_A).unwrap().stops, 0);
    assert_eq!(harness.engine.stats(HASH_B).unwrap().stops, 1);
}

#[tokio::test]
async fn names_that_would_address_the_whole_folder_are_not_relocated() {
    let harness = Harness::new().await;
    let fs = Arc::new(ScriptedFs::default());
    let (job, pool) = reconciler(&harness, fs.clone());

    harness.add_magnet(HASH_A, "..", 1000).await;
    harness.engine.update_progress(HASH_A, 1000, 0);

    let report = job.tick().await.unwrap();
    assert_eq!(report.relocations, 0);
    pool.drain().await;

    assert_eq!(fs.move_count(), 0);
    assert!(!harness.record(HASH_A).await.moved);
}
