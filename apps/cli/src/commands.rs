//! CLI command implementations

use crate::output::{print_report, TransferCells};
use crate::{FeedAction, JobKind, OutputFormat};
use anyhow::Result;
use console::style;
use seedwatch_core::{SeedwatchCore, TorrentStore};
use seedwatch_types::{QueueState, TorrentRecord};
use serde::Serialize;

// ============================================================================
// Daemon
// ============================================================================

pub async fn run_daemon(core: &SeedwatchCore) -> Result<()> {
    core.start_jobs()?;
    println!(
        "{} Seedwatch running, watching {}",
        style("✓").green().bold(),
        style(core.settings.watch_folder.display()).cyan()
    );

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    core.shutdown().await;
    Ok(())
}

pub async fn tick(core: &SeedwatchCore, job: JobKind, format: OutputFormat) -> Result<()> {
    match job {
        JobKind::Watch => {
            let report = core.watch_folder_job().tick().await?;
            print_report("watch", &report, format)?;
        }
        JobKind::Reconcile => {
            let report = core.reconcile_job().tick().await?;
            // Let relocations started by this tick finish before exiting
            core.relocations.drain().await;
            print_report("reconcile", &report, format)?;
        }
        JobKind::Feeds => {
            let report = core.feed_import_job().tick().await?;
            print_report("feeds", &report, format)?;
        }
    }
    Ok(())
}

// ============================================================================
// Feed Commands
// ============================================================================

pub async fn feed_action(
    core: &SeedwatchCore,
    action: FeedAction,
    format: OutputFormat,
) -> Result<()> {
    match action {
        FeedAction::Add { url, name } => {
            url::Url::parse(&url)?;
            let feed = core.store.add_feed_subscription(&url, name.as_deref()).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&feed)?);
                }
                OutputFormat::Human | OutputFormat::Table => {
                    println!(
                        "{} Subscribed to {}",
                        style("✓").green().bold(),
                        style(&feed.url).cyan()
                    );
                    println!("  ID: {}", feed.id);
                }
            }
        }

        FeedAction::List => {
            let feeds = core.store.fetch_feed_subscriptions().await?.feeds;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&feeds)?);
                }
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct FeedRow {
                        id: i64,
                        name: String,
                        url: String,
                        items: usize,
                    }

                    let rows: Vec<FeedRow> = feeds
                        .iter()
                        .map(|f| FeedRow {
                            id: f.id,
                            name: f.name.clone().unwrap_or_default(),
                            url: f.url.clone(),
                            items: f.items.len(),
                        })
                        .collect();

                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    if feeds.is_empty() {
                        println!("No feed subscriptions");
                    }
                    for feed in &feeds {
                        println!(
                            "{} {} ({} items)",
                            style(format!("#{}", feed.id)).dim(),
                            style(feed.name.as_deref().unwrap_or(&feed.url)).cyan(),
                            feed.items.len()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
struct Status {
    records: Vec<TorrentRecord>,
    queue: QueueState,
}

pub async fn show_status(core: &SeedwatchCore, format: OutputFormat) -> Result<()> {
    let records = core.store.fetch_all_records().await?;
    let mut queue = core.store.fetch_queue_state().await?;
    queue.max_active = core.settings.max_active_transfers;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&Status { records, queue })?
            );
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct RecordRow {
                hash: String,
                name: String,
                size: String,
                progress: String,
                ratio: String,
                status: String,
                moved: bool,
            }

            let rows: Vec<RecordRow> = records
                .iter()
                .map(|r| {
                    let cells = TransferCells::new(r);
                    RecordRow {
                        hash: r.hash.chars().take(8).collect(),
                        name: cells.name,
                        size: cells.size,
                        progress: cells.progress,
                        ratio: cells.ratio,
                        status: r.status.to_string(),
                        moved: r.moved,
                    }
                })
                .collect();

            println!("{}", Table::new(rows));
            println!("Active: {}/{}", queue.active.len(), queue.max_active);
        }
        OutputFormat::Human => {
            println!(
                "{} {}/{} active",
                style("Queue:").bold(),
                queue.active.len(),
                queue.max_active
            );
            if records.is_empty() {
                println!("No transfers");
            }
            for record in &records {
                let marker = if queue.is_active(&record.hash) {
                    style("●").green()
                } else {
                    style("○").dim()
                };
                let cells = TransferCells::new(record);
                println!(
                    "{} {} [{}] {} of {}, ratio {}{}",
                    marker,
                    style(&record.name).cyan(),
                    record.status,
                    cells.progress,
                    cells.size,
                    cells.ratio,
                    if record.moved { ", moved" } else { "" }
                );
            }
        }
    }

    Ok(())
}
