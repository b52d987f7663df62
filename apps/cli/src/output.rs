//! Report and transfer formatting

use crate::OutputFormat;
use console::style;
use seedwatch_types::TorrentRecord;
use serde::Serialize;
use std::fmt::Display;

const NAME_WIDTH: usize = 30;

/// Print a job report, prefixed with the job name unless JSON was asked for
pub fn print_report<T: Serialize + Display>(
    job: &str,
    report: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Human | OutputFormat::Table => {
            println!("{} {}", style(format!("{}:", job)).bold(), report)
        }
    }
    Ok(())
}

/// Display strings for one stored transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCells {
    pub name: String,
    pub size: String,
    pub progress: String,
    /// Uploaded over completed; `-` while nothing has completed
    pub ratio: String,
}

impl TransferCells {
    pub fn new(record: &TorrentRecord) -> Self {
        let name = if record.name.chars().count() > NAME_WIDTH {
            let head: String = record.name.chars().take(NAME_WIDTH - 3).collect();
            format!("{}...", head)
        } else {
            record.name.clone()
        };

        Self {
            name,
            size: human_bytes::human_bytes(record.total_size as f64),
            progress: format!("{:.1}%", record.progress()),
            ratio: record
                .seed_ratio()
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}
