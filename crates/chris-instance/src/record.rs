use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chris_plugin::{
  ComputeResourceId, CpuQuantity, MemoryQuantity, ParameterId, Plugin, PluginId, PluginType,
};

use crate::error::InstanceError;
use crate::parameter::ParameterValue;
use crate::status::InstanceStatus;

pub type InstanceId = u64;
pub type FeedId = u64;
pub type PipelineInstanceId = u64;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_SUMMARY_LEN: usize = 4000;
pub const MAX_ERROR_CODE_LEN: usize = 7;

/// The parts of a plugin descriptor an instance keeps.
///
/// Plugin descriptors are immutable, so the snapshot never goes stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRef {
  pub id: PluginId,
  pub name: String,
  pub version: String,
  #[serde(rename = "type")]
  pub plugin_type: PluginType,
}

impl From<&Plugin> for PluginRef {
  fn from(plugin: &Plugin) -> Self {
    Self {
      id: plugin.id,
      name: plugin.name.clone(),
      version: plugin.version.clone(),
      plugin_type: plugin.plugin_type,
    }
  }
}

/// Requested resource limits. Missing or zero values fall back to the plugin
/// minimums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu_limit: Option<CpuQuantity>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub memory_limit: Option<MemoryQuantity>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub number_of_workers: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gpu_limit: Option<u32>,
}

impl ResourceLimits {
  /// Fill every unset or zero limit from the plugin minimums.
  pub fn resolve(self, plugin: &Plugin) -> ResolvedLimits {
    ResolvedLimits {
      cpu_limit: self
        .cpu_limit
        .filter(|c| c.0 != 0)
        .unwrap_or(plugin.min_cpu_limit),
      memory_limit: self
        .memory_limit
        .filter(|m| m.0 != 0)
        .unwrap_or(plugin.min_memory_limit),
      number_of_workers: self
        .number_of_workers
        .filter(|n| *n != 0)
        .unwrap_or(plugin.min_number_of_workers),
      gpu_limit: self
        .gpu_limit
        .filter(|g| *g != 0)
        .unwrap_or(plugin.min_gpu_limit),
    }
  }
}

/// Resource limits after defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLimits {
  pub cpu_limit: CpuQuantity,
  pub memory_limit: MemoryQuantity,
  pub number_of_workers: u32,
  pub gpu_limit: u32,
}

impl From<ResolvedLimits> for ResourceLimits {
  fn from(limits: ResolvedLimits) -> Self {
    Self {
      cpu_limit: Some(limits.cpu_limit),
      memory_limit: Some(limits.memory_limit),
      number_of_workers: Some(limits.number_of_workers),
      gpu_limit: Some(limits.gpu_limit),
    }
  }
}

/// One node of the execution tree: a single invocation of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
  pub id: InstanceId,
  pub title: String,
  pub status: InstanceStatus,
  pub start_date: DateTime<Utc>,
  pub end_date: DateTime<Utc>,
  pub summary: String,
  pub raw: String,
  pub error_code: String,
  /// Parent instance. `None` only for data-source roots.
  pub previous: Option<InstanceId>,
  pub plugin: PluginRef,
  pub feed: FeedId,
  /// Username of the initiating principal.
  pub owner: String,
  pub compute_resource: Option<ComputeResourceId>,
  pub pipeline_inst: Option<PipelineInstanceId>,
  #[serde(flatten)]
  pub limits: ResolvedLimits,
}

impl InstanceRecord {
  pub fn is_root(&self) -> bool {
    self.plugin.plugin_type.is_data_source()
  }
}

/// A request to create a plugin instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstance {
  pub plugin_id: PluginId,
  pub owner: String,
  #[serde(default)]
  pub previous: Option<InstanceId>,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub compute_resource: Option<ComputeResourceId>,
  #[serde(default)]
  pub pipeline_inst: Option<PipelineInstanceId>,
  #[serde(default)]
  pub limits: ResourceLimits,
  #[serde(default)]
  pub parameters: Vec<(ParameterId, ParameterValue)>,
}

impl NewInstance {
  pub fn new(plugin_id: PluginId, owner: impl Into<String>) -> Self {
    Self {
      plugin_id,
      owner: owner.into(),
      previous: None,
      title: None,
      compute_resource: None,
      pipeline_inst: None,
      limits: ResourceLimits::default(),
      parameters: Vec::new(),
    }
  }

  pub fn previous(mut self, previous: InstanceId) -> Self {
    self.previous = Some(previous);
    self
  }

  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  pub fn compute_resource(mut self, id: ComputeResourceId) -> Self {
    self.compute_resource = Some(id);
    self
  }

  pub fn pipeline_inst(mut self, id: PipelineInstanceId) -> Self {
    self.pipeline_inst = Some(id);
    self
  }

  pub fn limits(mut self, limits: ResourceLimits) -> Self {
    self.limits = limits;
    self
  }

  pub fn parameter(mut self, id: ParameterId, value: ParameterValue) -> Self {
    self.parameters.push((id, value));
    self
  }
}

/// Mutable fields of an existing instance. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub summary: Option<String>,
  #[serde(default)]
  pub raw: Option<String>,
  #[serde(default)]
  pub error_code: Option<String>,
  /// `Some(None)` clears the compute resource.
  #[serde(default)]
  pub compute_resource: Option<Option<ComputeResourceId>>,
  /// Replaces all four limits; unset or zero entries are re-defaulted.
  #[serde(default)]
  pub limits: Option<ResourceLimits>,
}

pub(crate) fn check_len(
  field: &'static str,
  value: &str,
  max: usize,
) -> Result<(), InstanceError> {
  let len = value.chars().count();
  if len > max {
    return Err(InstanceError::validation(
      field,
      format!("{} characters exceeds the maximum of {}", len, max),
    ));
  }
  Ok(())
}
