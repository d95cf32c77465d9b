//! ChRIS Config
//!
//! This crate contains the serializable settings shared by the instance graph,
//! its persistence layer and the CLI.
//!
//! Settings can be loaded from:
//! - JSON files (via CLI with `--config=settings.json`)
//! - Defaults, when no file is given
//!
//! Every field is optional in the file; missing fields fall back to defaults.

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{InstanceSettings, LogSettings, Settings};
