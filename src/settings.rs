use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::DEFAULT_IN_PROGRESS_COEFF;

const APP_DIR: &str = "project-tracker";
const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Overrides the default workspace location when set.
    pub workspace_path: Option<String>,
    /// Coefficient applied to newly created projects.
    pub default_in_progress_coeff: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_path: None,
            default_in_progress_coeff: DEFAULT_IN_PROGRESS_COEFF,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push(APP_DIR);
        path.push("settings.toml");
        Some(path)
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("unable to determine config path"))?;
        self.save_to_path(&path)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    fn validate(&mut self) {
        if !self.default_in_progress_coeff.is_finite() {
            warn!(
                "invalid default_in_progress_coeff '{}' in settings config; falling back to {}",
                self.default_in_progress_coeff, DEFAULT_IN_PROGRESS_COEFF
            );
            self.default_in_progress_coeff = DEFAULT_IN_PROGRESS_COEFF;
        }
        self.default_in_progress_coeff = self.default_in_progress_coeff.clamp(0.0, 1.0);

        if let Some(path) = &self.workspace_path {
            let trimmed = path.trim();
            if trimmed.is_empty() {
                self.workspace_path = None;
            } else if trimmed != path {
                self.workspace_path = Some(trimmed.to_string());
            }
        }
    }

    /// Resolved workspace directory: the configured override, or a
    /// per-user data directory.
    pub fn workspace_dir(&self) -> PathBuf {
        if let Some(path) = &self.workspace_path {
            return PathBuf::from(path);
        }
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("workspace")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.workspace_dir().join(SNAPSHOT_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.workspace_dir().join("logs")
    }
}
