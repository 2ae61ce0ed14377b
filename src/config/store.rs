use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::AppConfig;
use crate::error::{GadgetError, Result};

/// Configuration store backed by a JSON file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigStore {
    /// Load the configuration, falling back to defaults if the file is absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            Self::load(&path)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            AppConfig::default()
        };
        Ok(Self { path, config })
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<AppConfig> {
        let text = fs::read_to_string(path).map_err(|e| GadgetError::io("read", path, e))?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config
            .gadget
            .validate()
            .map_err(|e| GadgetError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn get(&self) -> &AppConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change and persist it
    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        f(&mut self.config);
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| GadgetError::io("mkdir", parent, e))?;
        }
        let text = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, text).map_err(|e| GadgetError::io("write", &self.path, e))
    }
}
