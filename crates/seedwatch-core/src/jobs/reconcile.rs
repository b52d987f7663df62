//! Queue & ratio reconciler
//!
//! Brings persisted records in line with the live engine every tick: stops
//! transfers past the seed ratio, admits queued ones while there is room,
//! hands completed data to the relocation pool and keeps the active queue
//! within capacity.

use crate::engine::{LiveTransfer, TransferEngine};
use crate::error::SeedwatchError;
use crate::relocate::{RelocationJob, RelocationPool};
use crate::scheduler::ScheduledJob;
use crate::store::TorrentStore;
use async_trait::async_trait;
use chrono::Utc;
use seedwatch_types::{QueueState, Settings, TorrentRecord, TorrentStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub records: usize,
    pub stopped: usize,
    pub promoted: usize,
    pub relocations: usize,
    pub demoted: usize,
    pub failures: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records: {} stopped, {} promoted, {} relocating, {} demoted, {} failures",
            self.records, self.stopped, self.promoted, self.relocations, self.demoted, self.failures
        )
    }
}

pub struct ReconcileJob {
    store: Arc<dyn TorrentStore>,
    engine: Arc<dyn TransferEngine>,
    relocations: Arc<RelocationPool>,
    settings: Arc<Settings>,
}

impl ReconcileJob {
    pub fn new(
        store: Arc<dyn TorrentStore>,
        engine: Arc<dyn TransferEngine>,
        relocations: Arc<RelocationPool>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            engine,
            relocations,
            settings,
        }
    }

    /// Run one reconciliation pass
    pub async fn tick(&self) -> Result<TickReport, SeedwatchError> {
        let records = self.store.fetch_all_records().await?;
        let mut queue = self.store.fetch_queue_state().await?;
        queue.max_active = self.settings.max_active_transfers;

        let live: HashMap<String, LiveTransfer> = self
            .engine
            .list_active()
            .await?
            .into_iter()
            .map(|t| (t.hash.clone(), t))
            .collect();

        let mut report = TickReport {
            records: records.len(),
            ..TickReport::default()
        };
        let mut current: HashMap<String, TorrentRecord> = HashMap::with_capacity(records.len());

        for record in records {
            let hash = record.hash.clone();
            let fallback = record.clone();
            match self
                .reconcile_record(record, live.get(&hash), &mut queue, &mut report)
                .await
            {
                Ok(record) => {
                    current.insert(hash, record);
                }
                Err(e) => {
                    error!("Failed to reconcile {}: {}", hash, e);
                    report.failures += 1;
                    current.insert(hash, fallback);
                }
            }
        }

        self.validate_queue(&mut queue, &mut current, &live, &mut report)
            .await;
        self.store.update_queue_state(&queue).await?;

        Ok(report)
    }

    async fn reconcile_record(
        &self,
        mut record: TorrentRecord,
        live: Option<&LiveTransfer>,
        queue: &mut QueueState,
        report: &mut TickReport,
    ) -> Result<TorrentRecord, SeedwatchError> {
        let mut dirty = false;

        if let Some(live) = live {
            dirty |= refresh_from_live(&mut record, live);
        } else {
            debug!("{} is not loaded in the engine", record.hash);
        }

        // Ratio stop
        if let Some(live) = live {
            if record.upload_limit && record.status != TorrentStatus::Stopped {
                if let Some(ratio) = record.seed_ratio() {
                    if ratio >= self.settings.seed_ratio_stop {
                        match self.engine.stop(&live.handle).await {
                            Ok(()) => {
                                info!(
                                    "Torrent {} reached ratio {:.2}, stopping",
                                    record.name, ratio
                                );
                                record.status = TorrentStatus::Stopped;
                                self.store.update_record(&record).await?;
                                dirty = false;
                                queue.deactivate(&record.hash);
                                report.stopped += 1;
                            }
                            Err(e) => {
                                warn!("Failed to stop {}: {}", record.name, e);
                                report.failures += 1;
                            }
                        }
                    }
                }
            }
        }

        // Admission
        if record.status == TorrentStatus::Queued && queue.has_capacity() {
            let started = match live {
                Some(live) => match self.engine.start(&live.handle).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to start {}: {}", record.name, e);
                        report.failures += 1;
                        false
                    }
                },
                None => true,
            };
            if started {
                record.status = TorrentStatus::Active;
                record.activated_at = Some(Utc::now());
                self.store.update_record(&record).await?;
                dirty = false;
                queue.activate(&record.hash);
                report.promoted += 1;
                info!("Torrent {} is now active", record.name);
            }
        }

        // Completion
        if let Some(live) = live {
            if record.is_complete() && !record.moved {
                match RelocationJob::for_record(&record, Some(live.handle)) {
                    None => warn!(
                        "Torrent {} has no usable name ({:?}), not relocating",
                        record.hash, record.name
                    ),
                    // Claim before dispatch so the next tick cannot relocate again
                    Some(relocation) => {
                        if self.store.set_moved(&record.hash, false, true).await? {
                            if record.status == TorrentStatus::Active {
                                record.status = TorrentStatus::Completed;
                                dirty = true;
                            }
                            self.relocations.submit(relocation);
                            report.relocations += 1;
                        } else {
                            debug!("{} is already claimed for relocation", record.hash);
                        }
                        record.moved = true;
                    }
                }
            }
        }

        if dirty {
            self.store.update_record(&record).await?;
        }
        Ok(record)
    }

    /// Drop stale entries, adopt missing ones and demote overflow
    async fn validate_queue(
        &self,
        queue: &mut QueueState,
        records: &mut HashMap<String, TorrentRecord>,
        live: &HashMap<String, LiveTransfer>,
        report: &mut TickReport,
    ) {
        queue.active.retain(|hash| {
            let keep = records.get(hash).map(occupies_slot).unwrap_or(false);
            if !keep {
                debug!("Dropping {} from the active queue", hash);
            }
            keep
        });

        let mut missing: Vec<&TorrentRecord> = records
            .values()
            .filter(|r| occupies_slot(r) && !queue.is_active(&r.hash))
            .collect();
        missing.sort_by_key(|r| r.activated_at);
        let missing: Vec<String> = missing.into_iter().map(|r| r.hash.clone()).collect();
        for hash in missing {
            queue.activate(&hash);
        }

        while queue.overflow() > 0 {
            let hash = queue.active.remove(0);
            let Some(record) = records.get_mut(&hash) else {
                continue;
            };

            if let Some(live) = live.get(&hash) {
                if let Err(e) = self.engine.stop(&live.handle).await {
                    warn!("Failed to stop {} while demoting: {}", record.name, e);
                    report.failures += 1;
                }
            }

            record.status = TorrentStatus::Queued;
            record.activated_at = None;
            if let Err(e) = self.store.update_record(record).await {
                error!("Failed to persist demotion of {}: {}", record.name, e);
                report.failures += 1;
            }
            report.demoted += 1;
            info!("Torrent {} demoted back to the queue", record.name);
        }
    }
}

/// Statuses that hold a slot in the active queue
fn occupies_slot(record: &TorrentRecord) -> bool {
    matches!(
        record.status,
        TorrentStatus::Active | TorrentStatus::Completed
    )
}

/// Copy live progress onto the record; returns true if anything changed
fn refresh_from_live(record: &mut TorrentRecord, live: &LiveTransfer) -> bool {
    let before = (
        record.completed_bytes,
        record.uploaded_bytes,
        record.total_size,
        record.name.len(),
    );

    record.completed_bytes = live.bytes_completed;
    record.uploaded_bytes = record.uploaded_bytes.max(live.bytes_uploaded);
    if record.total_size == 0 && live.total_size > 0 {
        record.total_size = live.total_size;
    }
    if record.name.is_empty() && !live.name.is_empty() {
        record.name = live.name.clone();
    }

    before
        != (
            record.completed_bytes,
            record.uploaded_bytes,
            record.total_size,
            record.name.len(),
        )
}

#[async_trait]
impl ScheduledJob for ReconcileJob {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    fn interval(&self) -> Duration {
        self.settings.reconcile_interval()
    }

    async fn run(&self) -> Result<(), SeedwatchError> {
        let report = self.tick().await?;
        if report.stopped + report.promoted + report.relocations + report.demoted > 0 {
            info!(
                "Reconciled {} records: {} stopped, {} promoted, {} relocating, {} demoted",
                report.records, report.stopped, report.promoted, report.relocations, report.demoted
            );
        } else {
            debug!("Reconciled {} records, no changes", report.records);
        }
        if report.failures > 0 {
            warn!("Reconciliation had {} failures", report.failures);
        }
        Ok(())
    }
}
