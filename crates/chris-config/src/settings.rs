use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Directory holding the database. `None` means the CLI default (`~/.chris`).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data_dir: Option<PathBuf>,

  /// Database file name inside the data directory.
  pub database_file: String,

  pub instances: InstanceSettings,

  pub log: LogSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      data_dir: None,
      database_file: "chris.db".to_string(),
      instances: InstanceSettings::default(),
      log: LogSettings::default(),
    }
  }
}

impl Settings {
  /// Read settings from a JSON file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Read settings from `path` if given, otherwise return the defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(p) => Self::from_file(p),
      None => Ok(Self::default()),
    }
  }

  /// Full path of the database file under `data_dir`.
  pub fn database_path(&self, data_dir: &Path) -> PathBuf {
    data_dir.join(&self.database_file)
  }
}

/// Behaviour switches for plugin instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
  /// Re-stamp `end_date` when an instance reaches a terminal status.
  /// When false, `end_date` keeps the creation time.
  pub stamp_end_date_on_terminal: bool,
}

impl Default for InstanceSettings {
  fn default() -> Self {
    Self {
      stamp_end_date_on_terminal: true,
    }
  }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
  /// `EnvFilter` directive, e.g. "info" or "chris_instance=debug".
  /// `RUST_LOG` takes precedence when set.
  pub filter: String,
}

impl Default for LogSettings {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
    }
  }
}
