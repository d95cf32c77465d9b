//! Row types and conversions between rows and domain values.
//!
//! SQLite integers are signed, so ids and quantities are stored as `i64` and
//! range-checked on the way out.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use chris_instance::{
  Feed, InstanceFile, InstanceRecord, InstanceStatus, ParameterBinding, ParameterValue,
  PluginRef, ResolvedLimits, SplitRecord,
};
use chris_plugin::{
  ComputeResource, CpuQuantity, MemoryQuantity, ParameterType, Plugin, PluginParameter,
  PluginType,
};

use crate::Error;

pub(crate) fn unsigned<T: TryFrom<i64>>(table: &'static str, column: &str, value: i64) -> Result<T, Error> {
  T::try_from(value).map_err(|_| Error::Corrupt {
    table,
    message: format!("{} out of range: {}", column, value),
  })
}

fn corrupt(table: &'static str, err: impl std::fmt::Display) -> Error {
  Error::Corrupt {
    table,
    message: err.to_string(),
  }
}

pub(crate) fn signed(value: u64) -> Result<i64, Error> {
  i64::try_from(value).map_err(|_| Error::IdOutOfRange(value))
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct PluginRow {
  pub id: i64,
  pub name: String,
  pub version: String,
  pub plugin_type: String,
  pub min_cpu_limit: i64,
  pub min_memory_limit: i64,
  pub min_number_of_workers: i64,
  pub min_gpu_limit: i64,
}

impl TryFrom<PluginRow> for Plugin {
  type Error = Error;

  fn try_from(row: PluginRow) -> Result<Self, Error> {
    const TABLE: &str = "plugins";
    Ok(Plugin {
      id: unsigned(TABLE, "id", row.id)?,
      name: row.name,
      version: row.version,
      plugin_type: row
        .plugin_type
        .parse::<PluginType>()
        .map_err(|e| corrupt(TABLE, e))?,
      min_cpu_limit: CpuQuantity(unsigned(TABLE, "min_cpu_limit", row.min_cpu_limit)?),
      min_memory_limit: MemoryQuantity(unsigned(TABLE, "min_memory_limit", row.min_memory_limit)?),
      min_number_of_workers: unsigned(TABLE, "min_number_of_workers", row.min_number_of_workers)?,
      min_gpu_limit: unsigned(TABLE, "min_gpu_limit", row.min_gpu_limit)?,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct PluginParameterRow {
  pub id: i64,
  pub plugin_id: i64,
  pub name: String,
  pub param_type: String,
  pub optional: bool,
}

impl TryFrom<PluginParameterRow> for PluginParameter {
  type Error = Error;

  fn try_from(row: PluginParameterRow) -> Result<Self, Error> {
    const TABLE: &str = "plugin_parameters";
    Ok(PluginParameter {
      id: unsigned(TABLE, "id", row.id)?,
      plugin_id: unsigned(TABLE, "plugin_id", row.plugin_id)?,
      name: row.name,
      param_type: row
        .param_type
        .parse::<ParameterType>()
        .map_err(|e| corrupt(TABLE, e))?,
      optional: row.optional,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ComputeResourceRow {
  pub id: i64,
  pub name: String,
}

impl TryFrom<ComputeResourceRow> for ComputeResource {
  type Error = Error;

  fn try_from(row: ComputeResourceRow) -> Result<Self, Error> {
    Ok(ComputeResource {
      id: unsigned("compute_resources", "id", row.id)?,
      name: row.name,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct FeedRow {
  pub id: i64,
  pub name: String,
  pub creation_date: DateTime<Utc>,
}

impl FeedRow {
  pub fn into_feed(self, owners: BTreeSet<String>) -> Result<Feed, Error> {
    Ok(Feed {
      id: unsigned("feeds", "id", self.id)?,
      name: self.name,
      owners,
      creation_date: self.creation_date,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct FeedOwnerRow {
  pub feed_id: i64,
  pub username: String,
}

/// A `plugin_instances` row joined with its plugin.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct InstanceRow {
  pub id: i64,
  pub title: String,
  pub status: String,
  pub start_date: DateTime<Utc>,
  pub end_date: DateTime<Utc>,
  pub summary: String,
  pub raw: String,
  pub error_code: String,
  pub previous_id: Option<i64>,
  pub plugin_id: i64,
  pub plugin_name: String,
  pub plugin_version: String,
  pub plugin_type: String,
  pub feed_id: i64,
  pub owner: String,
  pub compute_resource_id: Option<i64>,
  pub pipeline_inst_id: Option<i64>,
  pub cpu_limit: i64,
  pub memory_limit: i64,
  pub number_of_workers: i64,
  pub gpu_limit: i64,
}

impl TryFrom<InstanceRow> for InstanceRecord {
  type Error = Error;

  fn try_from(row: InstanceRow) -> Result<Self, Error> {
    const TABLE: &str = "plugin_instances";
    let optional = |column: &str, value: Option<i64>| -> Result<Option<u64>, Error> {
      value.map(|v| unsigned(TABLE, column, v)).transpose()
    };

    Ok(InstanceRecord {
      id: unsigned(TABLE, "id", row.id)?,
      title: row.title,
      status: row
        .status
        .parse::<InstanceStatus>()
        .map_err(|e| corrupt(TABLE, e))?,
      start_date: row.start_date,
      end_date: row.end_date,
      summary: row.summary,
      raw: row.raw,
      error_code: row.error_code,
      previous: optional("previous_id", row.previous_id)?,
      plugin: PluginRef {
        id: unsigned(TABLE, "plugin_id", row.plugin_id)?,
        name: row.plugin_name,
        version: row.plugin_version,
        plugin_type: row
          .plugin_type
          .parse::<PluginType>()
          .map_err(|e| corrupt(TABLE, e))?,
      },
      feed: unsigned(TABLE, "feed_id", row.feed_id)?,
      owner: row.owner,
      compute_resource: optional("compute_resource_id", row.compute_resource_id)?,
      pipeline_inst: optional("pipeline_inst_id", row.pipeline_inst_id)?,
      limits: ResolvedLimits {
        cpu_limit: CpuQuantity(unsigned(TABLE, "cpu_limit", row.cpu_limit)?),
        memory_limit: MemoryQuantity(unsigned(TABLE, "memory_limit", row.memory_limit)?),
        number_of_workers: unsigned(TABLE, "number_of_workers", row.number_of_workers)?,
        gpu_limit: unsigned(TABLE, "gpu_limit", row.gpu_limit)?,
      },
    })
  }
}

/// A `parameters` row joined with the parameter name.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BindingRow {
  pub plugin_inst_id: i64,
  pub plugin_param_id: i64,
  pub name: String,
  pub kind: String,
  pub string_value: Option<String>,
  pub integer_value: Option<i64>,
  pub float_value: Option<f64>,
  pub boolean_value: Option<bool>,
  pub path_value: Option<String>,
}

impl TryFrom<BindingRow> for ParameterBinding {
  type Error = Error;

  fn try_from(row: BindingRow) -> Result<Self, Error> {
    const TABLE: &str = "parameters";
    let kind = row
      .kind
      .parse::<ParameterType>()
      .map_err(|e| corrupt(TABLE, e))?;
    let missing = || Error::Corrupt {
      table: TABLE,
      message: format!("no value for {} parameter '{}'", kind, row.name),
    };

    let value = match kind {
      ParameterType::String => ParameterValue::String(row.string_value.ok_or_else(missing)?),
      ParameterType::Integer => ParameterValue::Integer(row.integer_value.ok_or_else(missing)?),
      ParameterType::Float => ParameterValue::Float(row.float_value.ok_or_else(missing)?),
      ParameterType::Boolean => ParameterValue::Boolean(row.boolean_value.ok_or_else(missing)?),
      ParameterType::Path => ParameterValue::Path(row.path_value.ok_or_else(missing)?),
      ParameterType::Unextpath => {
        ParameterValue::Unextpath(row.path_value.ok_or_else(missing)?)
      }
    };

    Ok(ParameterBinding {
      instance_id: unsigned(TABLE, "plugin_inst_id", row.plugin_inst_id)?,
      parameter_id: unsigned(TABLE, "plugin_param_id", row.plugin_param_id)?,
      name: row.name,
      value,
    })
  }
}

/// Value columns of a `parameters` row.
#[derive(Debug, Default)]
pub(crate) struct ValueColumns {
  pub string_value: Option<String>,
  pub integer_value: Option<i64>,
  pub float_value: Option<f64>,
  pub boolean_value: Option<bool>,
  pub path_value: Option<String>,
}

impl From<&ParameterValue> for ValueColumns {
  fn from(value: &ParameterValue) -> Self {
    match value {
      ParameterValue::String(s) => Self {
        string_value: Some(s.clone()),
        ..Default::default()
      },
      ParameterValue::Integer(i) => Self {
        integer_value: Some(*i),
        ..Default::default()
      },
      ParameterValue::Float(f) => Self {
        float_value: Some(*f),
        ..Default::default()
      },
      ParameterValue::Boolean(b) => Self {
        boolean_value: Some(*b),
        ..Default::default()
      },
      ParameterValue::Path(p) | ParameterValue::Unextpath(p) => Self {
        path_value: Some(p.clone()),
        ..Default::default()
      },
    }
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SplitRow {
  pub id: i64,
  pub plugin_inst_id: i64,
  pub creation_date: DateTime<Utc>,
  pub filter: String,
  pub created_plugin_inst_ids: String,
}

impl TryFrom<SplitRow> for SplitRecord {
  type Error = Error;

  fn try_from(row: SplitRow) -> Result<Self, Error> {
    const TABLE: &str = "plugin_instance_splits";
    let created_plugin_inst_ids = row
      .created_plugin_inst_ids
      .split(',')
      .filter(|s| !s.is_empty())
      .map(|s| s.trim().parse::<u64>().map_err(|e| corrupt(TABLE, e)))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(SplitRecord {
      id: unsigned(TABLE, "id", row.id)?,
      plugin_inst: unsigned(TABLE, "plugin_inst_id", row.plugin_inst_id)?,
      creation_date: row.creation_date,
      filter: row.filter,
      created_plugin_inst_ids,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct FileRow {
  pub id: i64,
  pub creation_date: DateTime<Utc>,
  pub fname: String,
  pub plugin_inst_id: i64,
  pub feed_id: i64,
}

impl TryFrom<FileRow> for InstanceFile {
  type Error = Error;

  fn try_from(row: FileRow) -> Result<Self, Error> {
    const TABLE: &str = "plugin_instance_files";
    Ok(InstanceFile {
      id: unsigned(TABLE, "id", row.id)?,
      creation_date: row.creation_date,
      fname: row.fname,
      plugin_inst: unsigned(TABLE, "plugin_inst_id", row.plugin_inst_id)?,
      feed: unsigned(TABLE, "feed_id", row.feed_id)?,
    })
  }
}
