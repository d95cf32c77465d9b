use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::quantity::{CpuQuantity, MemoryQuantity};

pub type PluginId = u64;
pub type ParameterId = u64;
pub type ComputeResourceId = u64;

/// Kind of plugin.
///
/// `Fs` plugins are data sources: they start a new tree (and feed) and never
/// have a parent. `Ds` and `Ts` plugins are data steps and always have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
  Fs,
  Ds,
  Ts,
}

impl PluginType {
  pub fn is_data_source(self) -> bool {
    matches!(self, PluginType::Fs)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PluginType::Fs => "fs",
      PluginType::Ds => "ds",
      PluginType::Ts => "ts",
    }
  }
}

impl fmt::Display for PluginType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PluginType {
  type Err = PluginError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "fs" => Ok(PluginType::Fs),
      "ds" => Ok(PluginType::Ds),
      "ts" => Ok(PluginType::Ts),
      other => Err(PluginError::InvalidPluginType(other.to_string())),
    }
  }
}

/// An immutable plugin descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
  pub id: PluginId,
  /// Plugin name, e.g. "pl-dircopy". Used in output paths.
  pub name: String,
  pub version: String,
  #[serde(rename = "type")]
  pub plugin_type: PluginType,
  pub min_cpu_limit: CpuQuantity,
  pub min_memory_limit: MemoryQuantity,
  pub min_number_of_workers: u32,
  pub min_gpu_limit: u32,
}

impl Plugin {
  /// A descriptor with the smallest sensible resource minimums.
  pub fn new(
    id: PluginId,
    name: impl Into<String>,
    version: impl Into<String>,
    plugin_type: PluginType,
  ) -> Self {
    Self {
      id,
      name: name.into(),
      version: version.into(),
      plugin_type,
      min_cpu_limit: CpuQuantity(1000),
      min_memory_limit: MemoryQuantity(200),
      min_number_of_workers: 1,
      min_gpu_limit: 0,
    }
  }
}

/// Value type accepted by a plugin parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
  String,
  Integer,
  Float,
  Boolean,
  Path,
  Unextpath,
}

impl ParameterType {
  pub fn as_str(self) -> &'static str {
    match self {
      ParameterType::String => "string",
      ParameterType::Integer => "integer",
      ParameterType::Float => "float",
      ParameterType::Boolean => "boolean",
      ParameterType::Path => "path",
      ParameterType::Unextpath => "unextpath",
    }
  }
}

impl fmt::Display for ParameterType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ParameterType {
  type Err = PluginError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "string" => Ok(ParameterType::String),
      "integer" => Ok(ParameterType::Integer),
      "float" => Ok(ParameterType::Float),
      "boolean" => Ok(ParameterType::Boolean),
      "path" => Ok(ParameterType::Path),
      "unextpath" => Ok(ParameterType::Unextpath),
      other => Err(PluginError::InvalidParameterType(other.to_string())),
    }
  }
}

/// A parameter declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParameter {
  pub id: ParameterId,
  pub plugin_id: PluginId,
  pub name: String,
  #[serde(rename = "type")]
  pub param_type: ParameterType,
  #[serde(default)]
  pub optional: bool,
}

/// An execution environment instances can be scheduled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResource {
  pub id: ComputeResourceId,
  pub name: String,
}
