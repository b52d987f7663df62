//! Error types for Seedwatch core

use thiserror::Error;

/// Errors that can occur in Seedwatch core
#[derive(Debug, Error)]
pub enum SeedwatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Relocation failed: {0}")]
    Relocation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Job already running: {0}")]
    JobAlreadyRunning(String),

    #[error("Job already scheduled: {0}")]
    JobAlreadyScheduled(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl SeedwatchError {
    /// Whether the failure may clear up on a later tick without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            SeedwatchError::Io(_)
            | SeedwatchError::Network(_)
            | SeedwatchError::Database(_)
            | SeedwatchError::Relocation(_)
            | SeedwatchError::Feed(_)
            | SeedwatchError::Engine(_)
            | SeedwatchError::JobAlreadyRunning(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SeedwatchError {
    fn from(error: serde_json::Error) -> Self {
        SeedwatchError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SeedwatchError>;
