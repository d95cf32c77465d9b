//! Declarative instance filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chris_plugin::PluginId;

use crate::error::InstanceError;
use crate::graph::InstanceGraph;
use crate::record::{FeedId, InstanceId, InstanceRecord, PipelineInstanceId};
use crate::status::InstanceStatus;

/// Criteria for [`crate::InstanceStore::query`]. Unset fields match everything;
/// set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceFilter {
  pub id: Option<InstanceId>,
  pub min_start_date: Option<DateTime<Utc>>,
  pub max_start_date: Option<DateTime<Utc>>,
  pub min_end_date: Option<DateTime<Utc>>,
  pub max_end_date: Option<DateTime<Utc>>,
  /// Restrict to the subtree under this instance (inclusive).
  pub root_id: Option<InstanceId>,
  /// Case-insensitive substring of the title.
  pub title: Option<String>,
  pub status: Option<InstanceStatus>,
  pub owner_username: Option<String>,
  pub feed_id: Option<FeedId>,
  pub plugin_id: Option<PluginId>,
  /// Case-insensitive substring of the plugin name.
  pub plugin_name: Option<String>,
  pub plugin_name_exact: Option<String>,
  pub plugin_version: Option<String>,
  pub pipeline_inst_id: Option<PipelineInstanceId>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
  haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl InstanceFilter {
  /// Attribute criteria only; `root_id` is applied by [`InstanceFilter::apply`].
  pub fn matches(&self, record: &InstanceRecord) -> bool {
    self.id.is_none_or(|id| record.id == id)
      && self.min_start_date.is_none_or(|d| record.start_date >= d)
      && self.max_start_date.is_none_or(|d| record.start_date <= d)
      && self.min_end_date.is_none_or(|d| record.end_date >= d)
      && self.max_end_date.is_none_or(|d| record.end_date <= d)
      && self
        .title
        .as_deref()
        .is_none_or(|t| contains_ignore_case(&record.title, t))
      && self.status.is_none_or(|s| record.status == s)
      && self
        .owner_username
        .as_deref()
        .is_none_or(|o| record.owner == o)
      && self.feed_id.is_none_or(|f| record.feed == f)
      && self.plugin_id.is_none_or(|p| record.plugin.id == p)
      && self
        .plugin_name
        .as_deref()
        .is_none_or(|n| contains_ignore_case(&record.plugin.name, n))
      && self
        .plugin_name_exact
        .as_deref()
        .is_none_or(|n| record.plugin.name == n)
      && self
        .plugin_version
        .as_deref()
        .is_none_or(|v| record.plugin.version == v)
      && self
        .pipeline_inst_id
        .is_none_or(|p| record.pipeline_inst == Some(p))
  }

  /// Evaluate the filter over a graph. Newest first (`start_date`, then id).
  pub fn apply(&self, graph: &InstanceGraph) -> Result<Vec<InstanceRecord>, InstanceError> {
    let candidates: Vec<&InstanceRecord> = match self.root_id {
      Some(root_id) if !graph.contains(root_id) => Vec::new(),
      Some(root_id) => graph.descendants(root_id)?,
      None => graph.iter().collect(),
    };

    let mut result: Vec<InstanceRecord> = candidates
      .into_iter()
      .filter(|r| self.matches(r))
      .cloned()
      .collect();
    result.sort_by(|a, b| b.start_date.cmp(&a.start_date).then_with(|| b.id.cmp(&a.id)));

    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{PluginRef, ResourceLimits};
  use chris_plugin::{Plugin, PluginType};

  fn record(id: InstanceId, title: &str, plugin: &Plugin, previous: Option<InstanceId>) -> InstanceRecord {
    InstanceRecord {
      id,
      title: title.to_string(),
      status: InstanceStatus::Created,
      start_date: Utc::now(),
      end_date: Utc::now(),
      summary: String::new(),
      raw: String::new(),
      error_code: String::new(),
      previous,
      plugin: PluginRef::from(plugin),
      feed: 1,
      owner: "alice".to_string(),
      compute_resource: None,
      pipeline_inst: None,
      limits: ResourceLimits::default().resolve(plugin),
    }
  }

  #[test]
  fn test_title_and_plugin_name_are_case_insensitive() {
    let plugin = Plugin::new(1, "pl-DirCopy", "2.1.0", PluginType::Fs);
    let r = record(1, "Brain Scans", &plugin, None);

    let filter = InstanceFilter {
      title: Some("brain".to_string()),
      plugin_name: Some("dircopy".to_string()),
      ..Default::default()
    };
    assert!(filter.matches(&r));

    let exact = InstanceFilter {
      plugin_name_exact: Some("pl-dircopy".to_string()),
      ..Default::default()
    };
    assert!(!exact.matches(&r));
  }

  #[test]
  fn test_unknown_root_id_is_empty() {
    let plugin = Plugin::new(1, "pl-dircopy", "2.1.0", PluginType::Fs);
    let mut graph = InstanceGraph::new();
    graph.insert(record(1, "", &plugin, None)).unwrap();

    let filter = InstanceFilter {
      root_id: Some(42),
      ..Default::default()
    };
    assert!(filter.apply(&graph).unwrap().is_empty());
  }

  #[test]
  fn test_root_id_composes_with_attributes() {
    let fs = Plugin::new(1, "pl-dircopy", "2.1.0", PluginType::Fs);
    let ds = Plugin::new(2, "pl-simpledsapp", "2.0.0", PluginType::Ds);
    let mut graph = InstanceGraph::new();
    graph.insert(record(1, "", &fs, None)).unwrap();
    graph.insert(record(2, "", &ds, Some(1))).unwrap();
    graph.insert(record(3, "", &ds, Some(2))).unwrap();
    graph.insert(record(4, "", &fs, None)).unwrap();

    let filter = InstanceFilter {
      root_id: Some(1),
      plugin_name: Some("simpleds".to_string()),
      ..Default::default()
    };
    let ids: Vec<_> = filter.apply(&graph).unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&2) && ids.contains(&3));
  }

  #[test]
  fn test_deserialize_from_query_like_json() {
    let filter: InstanceFilter = serde_json::from_str(
      r#"{ "status": "finishedSuccessfully", "owner_username": "alice", "min_start_date": "2024-01-01T00:00:00Z" }"#,
    )
    .unwrap();
    assert_eq!(filter.status, Some(InstanceStatus::FinishedSuccessfully));
    assert!(filter.min_start_date.is_some());
  }
}
