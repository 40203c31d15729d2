//! Storage layer for persistent settings

use crate::error::SplitdlError;
use splitdl_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

const SETTINGS_FILE: &str = "settings.json";

/// Storage manager for splitdl data
#[derive(Clone, Debug)]
pub struct Storage {
    /// Data directory
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(data_dir: PathBuf) -> Result<Self, SplitdlError> {
        fs::create_dir_all(&data_dir).await?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    /// Load settings, writing the defaults out on first use
    pub async fn load_settings(&self) -> Result<Settings, SplitdlError> {
        let path = self.settings_path();

        if !path.exists() {
            let settings = Settings::default();
            self.save_settings(&settings).await?;
            info!("Created default settings at {}", path.display());
            return Ok(settings);
        }

        let content = fs::read_to_string(&path).await?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate().map_err(SplitdlError::InvalidSettings)?;

        Ok(settings)
    }

    /// Save settings to storage
    pub async fn save_settings(&self, settings: &Settings) -> Result<(), SplitdlError> {
        settings.validate().map_err(SplitdlError::InvalidSettings)?;

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), content).await?;

        Ok(())
    }

    /// Replace stored settings with the defaults
    pub async fn reset_settings(&self) -> Result<Settings, SplitdlError> {
        let settings = Settings::default();
        self.save_settings(&settings).await?;
        Ok(settings)
    }
}
