//! Typed parameter bindings.
//!
//! Bindings live in one table per value kind, each keyed by
//! (instance, parameter). A parameter has exactly one type, so the key is
//! unique across all six tables as well.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use chris_plugin::{ParameterId, ParameterType, PluginParameter};

use crate::error::InstanceError;
use crate::record::InstanceId;

/// Maximum length of string values.
pub const MAX_STRING_LEN: usize = 600;
/// Maximum length of path values (a path value may list several paths).
pub const MAX_PATH_LEN: usize = 20000;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
  String(String),
  Integer(i64),
  Float(f64),
  Boolean(bool),
  Path(String),
  Unextpath(String),
}

impl ParameterValue {
  pub fn kind(&self) -> ParameterType {
    match self {
      ParameterValue::String(_) => ParameterType::String,
      ParameterValue::Integer(_) => ParameterType::Integer,
      ParameterValue::Float(_) => ParameterType::Float,
      ParameterValue::Boolean(_) => ParameterType::Boolean,
      ParameterValue::Path(_) => ParameterType::Path,
      ParameterValue::Unextpath(_) => ParameterType::Unextpath,
    }
  }

  fn check_len(&self) -> Result<(), InstanceError> {
    match self {
      ParameterValue::String(s) => crate::record::check_len("parameters", s, MAX_STRING_LEN),
      ParameterValue::Path(s) | ParameterValue::Unextpath(s) => {
        crate::record::check_len("parameters", s, MAX_PATH_LEN)
      }
      _ => Ok(()),
    }
  }
}

/// A parameter value bound to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
  pub instance_id: InstanceId,
  pub parameter_id: ParameterId,
  /// Parameter name, copied from the plugin parameter descriptor.
  pub name: String,
  pub value: ParameterValue,
}

impl ParameterBinding {
  /// Build a binding after checking the value against the descriptor.
  pub fn new(
    instance_id: InstanceId,
    parameter: &PluginParameter,
    value: ParameterValue,
  ) -> Result<Self, InstanceError> {
    if value.kind() != parameter.param_type {
      return Err(InstanceError::validation(
        "parameters",
        format!(
          "parameter '{}' expects a {} value, got {}",
          parameter.name,
          parameter.param_type,
          value.kind()
        ),
      ));
    }
    value.check_len()?;

    Ok(Self {
      instance_id,
      parameter_id: parameter.id,
      name: parameter.name.clone(),
      value,
    })
  }
}

type Table = BTreeMap<(InstanceId, ParameterId), ParameterBinding>;

const KINDS: [ParameterType; 6] = [
  ParameterType::Unextpath,
  ParameterType::Path,
  ParameterType::String,
  ParameterType::Integer,
  ParameterType::Float,
  ParameterType::Boolean,
];

/// Six typed binding tables.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
  string: Table,
  integer: Table,
  float: Table,
  boolean: Table,
  path: Table,
  unextpath: Table,
}

fn instance_range(id: InstanceId) -> RangeInclusive<(InstanceId, ParameterId)> {
  (id, ParameterId::MIN)..=(id, ParameterId::MAX)
}

impl ParameterStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn table(&self, kind: ParameterType) -> &Table {
    match kind {
      ParameterType::String => &self.string,
      ParameterType::Integer => &self.integer,
      ParameterType::Float => &self.float,
      ParameterType::Boolean => &self.boolean,
      ParameterType::Path => &self.path,
      ParameterType::Unextpath => &self.unextpath,
    }
  }

  fn table_mut(&mut self, kind: ParameterType) -> &mut Table {
    match kind {
      ParameterType::String => &mut self.string,
      ParameterType::Integer => &mut self.integer,
      ParameterType::Float => &mut self.float,
      ParameterType::Boolean => &mut self.boolean,
      ParameterType::Path => &mut self.path,
      ParameterType::Unextpath => &mut self.unextpath,
    }
  }

  /// Whether any value is bound for (instance, parameter).
  pub fn contains(&self, instance_id: InstanceId, parameter_id: ParameterId) -> bool {
    KINDS
      .iter()
      .any(|kind| self.table(*kind).contains_key(&(instance_id, parameter_id)))
  }

  /// Insert a new binding. Never overwrites.
  pub fn bind(&mut self, binding: ParameterBinding) -> Result<(), InstanceError> {
    if self.contains(binding.instance_id, binding.parameter_id) {
      return Err(InstanceError::DuplicateParameter {
        instance_id: binding.instance_id,
        parameter_id: binding.parameter_id,
      });
    }
    let key = (binding.instance_id, binding.parameter_id);
    self.table_mut(binding.value.kind()).insert(key, binding);
    Ok(())
  }

  /// Replace the value of an existing binding.
  pub fn update(&mut self, binding: ParameterBinding) -> Result<(), InstanceError> {
    let key = (binding.instance_id, binding.parameter_id);
    match self.table_mut(binding.value.kind()).get_mut(&key) {
      Some(existing) => {
        existing.value = binding.value;
        Ok(())
      }
      None => Err(InstanceError::NotFound {
        kind: "parameter binding",
        id: binding.parameter_id,
      }),
    }
  }

  /// All bindings of an instance, across every kind. No ordering is promised
  /// between kinds.
  pub fn get_all(&self, instance_id: InstanceId) -> Vec<ParameterBinding> {
    KINDS
      .iter()
      .flat_map(|kind| {
        self
          .table(*kind)
          .range(instance_range(instance_id))
          .map(|(_, binding)| binding.clone())
      })
      .collect()
  }

  /// Every binding in the store.
  pub fn iter(&self) -> impl Iterator<Item = &ParameterBinding> {
    KINDS.iter().flat_map(|kind| self.table(*kind).values())
  }

  /// Drop every binding of an instance.
  pub fn remove_instance(&mut self, instance_id: InstanceId) {
    for kind in KINDS {
      let table = self.table_mut(kind);
      let keys: Vec<_> = table
        .range(instance_range(instance_id))
        .map(|(k, _)| *k)
        .collect();
      for key in keys {
        table.remove(&key);
      }
    }
  }
}
