//! Settings file in the data directory

use crate::error::SeedwatchError;
use seedwatch_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

const SETTINGS_FILE: &str = "settings.json";

/// `settings.json` reader/writer
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    data_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            path: data_dir.join(SETTINGS_FILE),
            data_dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, writing the defaults for this data directory if the
    /// file does not exist yet
    pub async fn load(&self) -> Result<Settings, SeedwatchError> {
        let settings = if fs::try_exists(&self.path).await? {
            let content = fs::read_to_string(&self.path).await?;
            serde_json::from_str::<Settings>(&content)?
        } else {
            let settings = Settings::with_data_dir(&self.data_dir);
            self.save(&settings).await?;
            info!("Wrote default settings to {}", self.path.display());
            settings
        };

        settings.validate().map_err(SeedwatchError::Config)?;
        Ok(settings)
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), SeedwatchError> {
        settings.validate().map_err(SeedwatchError::Config)?;
        fs::create_dir_all(&self.data_dir).await?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }
}
