use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::PluginError;
use crate::plugin::{
  ComputeResource, ComputeResourceId, ParameterId, Plugin, PluginId, PluginParameter,
};

/// Read-only lookup of plugin metadata consumed by the instance graph.
pub trait PluginCatalog: Send + Sync {
  /// Get a plugin by ID.
  fn plugin(&self, id: PluginId) -> Option<Plugin>;

  /// Get a plugin parameter by ID.
  fn parameter(&self, id: ParameterId) -> Option<PluginParameter>;

  /// List the parameters declared by a plugin.
  fn parameters(&self, plugin_id: PluginId) -> Vec<PluginParameter>;

  /// Get a compute resource by ID.
  fn compute_resource(&self, id: ComputeResourceId) -> Option<ComputeResource>;
}

#[derive(Default)]
struct Tables {
  plugins: BTreeMap<PluginId, Plugin>,
  parameters: BTreeMap<ParameterId, PluginParameter>,
  compute_resources: BTreeMap<ComputeResourceId, ComputeResource>,
}

/// Catalog kept in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
  tables: RwLock<Tables>,
}

impl InMemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a plugin. IDs are never reused.
  pub fn add_plugin(&self, plugin: Plugin) -> Result<(), PluginError> {
    let mut tables = self.tables.write();
    if tables.plugins.contains_key(&plugin.id) {
      return Err(PluginError::AlreadyExists {
        kind: "plugin",
        id: plugin.id,
      });
    }
    tables.plugins.insert(plugin.id, plugin);
    Ok(())
  }

  /// Register a parameter for an already registered plugin.
  pub fn add_parameter(&self, parameter: PluginParameter) -> Result<(), PluginError> {
    let mut tables = self.tables.write();
    if !tables.plugins.contains_key(&parameter.plugin_id) {
      return Err(PluginError::NotFound {
        kind: "plugin",
        id: parameter.plugin_id,
      });
    }
    if tables.parameters.contains_key(&parameter.id) {
      return Err(PluginError::AlreadyExists {
        kind: "plugin parameter",
        id: parameter.id,
      });
    }
    tables.parameters.insert(parameter.id, parameter);
    Ok(())
  }

  pub fn add_compute_resource(&self, resource: ComputeResource) -> Result<(), PluginError> {
    let mut tables = self.tables.write();
    if tables.compute_resources.contains_key(&resource.id) {
      return Err(PluginError::AlreadyExists {
        kind: "compute resource",
        id: resource.id,
      });
    }
    tables.compute_resources.insert(resource.id, resource);
    Ok(())
  }

  /// Remove a compute resource. Returns the removed entry, if any.
  pub fn remove_compute_resource(&self, id: ComputeResourceId) -> Option<ComputeResource> {
    self.tables.write().compute_resources.remove(&id)
  }

  /// List all plugins ordered by ID.
  pub fn plugins(&self) -> Vec<Plugin> {
    self.tables.read().plugins.values().cloned().collect()
  }

  /// List all compute resources ordered by ID.
  pub fn compute_resources(&self) -> Vec<ComputeResource> {
    self.tables.read().compute_resources.values().cloned().collect()
  }
}

impl PluginCatalog for InMemoryCatalog {
  fn plugin(&self, id: PluginId) -> Option<Plugin> {
    self.tables.read().plugins.get(&id).cloned()
  }

  fn parameter(&self, id: ParameterId) -> Option<PluginParameter> {
    self.tables.read().parameters.get(&id).cloned()
  }

  fn parameters(&self, plugin_id: PluginId) -> Vec<PluginParameter> {
    self
      .tables
      .read()
      .parameters
      .values()
      .filter(|p| p.plugin_id == plugin_id)
      .cloned()
      .collect()
  }

  fn compute_resource(&self, id: ComputeResourceId) -> Option<ComputeResource> {
    self.tables.read().compute_resources.get(&id).cloned()
  }
}
