use thiserror::Error;

/// Errors that can occur when working with plugin descriptors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
  /// A referenced descriptor does not exist.
  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: u64 },

  /// A descriptor with the same id is already registered.
  #[error("{kind} already exists: {id}")]
  AlreadyExists { kind: &'static str, id: u64 },

  /// A CPU or memory quantity could not be parsed.
  #[error("invalid {kind} quantity: {value:?}")]
  InvalidQuantity { kind: &'static str, value: String },

  /// A plugin type string is not one of "fs", "ds", "ts".
  #[error("invalid plugin type: {0:?}")]
  InvalidPluginType(String),

  /// A parameter type string is not recognised.
  #[error("invalid parameter type: {0:?}")]
  InvalidParameterType(String),
}
