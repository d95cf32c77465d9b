use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::InstanceError;
use crate::record::{InstanceId, InstanceRecord};

/// Arena of instance records with a children-by-parent index.
///
/// Each record stores its parent id (`previous`); the inverse direction is
/// kept in `children`. The two are always updated together.
#[derive(Debug, Clone, Default)]
pub struct InstanceGraph {
  nodes: BTreeMap<InstanceId, InstanceRecord>,
  /// parent id -> child ids, in insertion order.
  children: HashMap<InstanceId, Vec<InstanceId>>,
}

impl InstanceGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: InstanceId) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn get(&self, id: InstanceId) -> Option<&InstanceRecord> {
    self.nodes.get(&id)
  }

  pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut InstanceRecord> {
    self.nodes.get_mut(&id)
  }

  /// Records ordered by id.
  pub fn iter(&self) -> impl Iterator<Item = &InstanceRecord> {
    self.nodes.values()
  }

  pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut InstanceRecord> {
    self.nodes.values_mut()
  }

  /// Direct children of an instance.
  pub fn children(&self, id: InstanceId) -> &[InstanceId] {
    self
      .children
      .get(&id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Add a record. Its parent, if any, must already be present.
  pub fn insert(&mut self, record: InstanceRecord) -> Result<(), InstanceError> {
    if self.nodes.contains_key(&record.id) {
      return Err(InstanceError::Integrity {
        id: record.id,
        message: "instance id already present".to_string(),
      });
    }
    if let Some(parent) = record.previous {
      if !self.nodes.contains_key(&parent) {
        return Err(InstanceError::Integrity {
          id: record.id,
          message: format!("previous instance {} does not exist", parent),
        });
      }
      self.children.entry(parent).or_default().push(record.id);
    }
    self.nodes.insert(record.id, record);
    Ok(())
  }

  fn require(&self, id: InstanceId) -> Result<&InstanceRecord, InstanceError> {
    self
      .nodes
      .get(&id)
      .ok_or_else(|| InstanceError::instance_not_found(id))
  }

  /// Walk `previous` links from `id` to the data-source root.
  ///
  /// Returns the chain leaf-first, the root last.
  fn ancestry(&self, id: InstanceId) -> Result<Vec<&InstanceRecord>, InstanceError> {
    let mut current = self.require(id)?;
    let mut chain = vec![current];

    while !current.is_root() {
      let parent_id = current.previous.ok_or_else(|| InstanceError::Integrity {
        id: current.id,
        message: format!(
          "plugin '{}' is of type {} but the instance has no previous",
          current.plugin.name, current.plugin.plugin_type
        ),
      })?;
      current = self.nodes.get(&parent_id).ok_or_else(|| InstanceError::Integrity {
        id: current.id,
        message: format!("previous instance {} does not exist", parent_id),
      })?;
      chain.push(current);

      if chain.len() > self.nodes.len() {
        return Err(InstanceError::Integrity {
          id,
          message: "cycle in previous links".to_string(),
        });
      }
    }

    Ok(chain)
  }

  /// The data-source instance at the top of `id`'s tree.
  pub fn root(&self, id: InstanceId) -> Result<&InstanceRecord, InstanceError> {
    let chain = self.ancestry(id)?;
    // ancestry always holds at least the starting node
    Ok(chain[chain.len() - 1])
  }

  /// Number of hops from `id` up to its root.
  pub fn depth(&self, id: InstanceId) -> Result<usize, InstanceError> {
    Ok(self.ancestry(id)?.len() - 1)
  }

  /// The instance itself plus everything reachable through `children`.
  /// Traversal order is unspecified; each node appears once.
  pub fn descendants(&self, id: InstanceId) -> Result<Vec<&InstanceRecord>, InstanceError> {
    self.require(id)?;

    let mut visited = HashSet::new();
    let mut stack = vec![id];
    let mut result = Vec::new();

    while let Some(current) = stack.pop() {
      if !visited.insert(current) {
        continue;
      }
      let record = self.nodes.get(&current).ok_or_else(|| InstanceError::Integrity {
        id: current,
        message: "child index points at a missing instance".to_string(),
      })?;
      result.push(record);
      stack.extend(self.children(current).iter().copied());
    }

    Ok(result)
  }

  /// Storage path for the files produced by `id`:
  /// `{owner}/feed_{feed}/{root_plugin}_{root_id}/…/{plugin}_{id}/data`.
  pub fn output_path(&self, id: InstanceId) -> Result<String, InstanceError> {
    let chain = self.ancestry(id)?;
    let leaf = chain[0];
    let root = chain[chain.len() - 1];

    let mut path = format!("{}/feed_{}", leaf.owner, root.feed);
    for record in chain.iter().rev() {
      path.push_str(&format!("/{}_{}", record.plugin.name, record.id));
    }
    path.push_str("/data");

    Ok(path)
  }

  /// Remove `id` and its whole subtree. Returns the removed records.
  pub(crate) fn remove_subtree(
    &mut self,
    id: InstanceId,
  ) -> Result<Vec<InstanceRecord>, InstanceError> {
    let ids: Vec<InstanceId> = self.descendants(id)?.iter().map(|r| r.id).collect();

    if let Some(parent) = self.nodes.get(&id).and_then(|r| r.previous)
      && let Some(siblings) = self.children.get_mut(&parent)
    {
      siblings.retain(|child| *child != id);
    }

    let mut removed = Vec::with_capacity(ids.len());
    for removed_id in ids {
      self.children.remove(&removed_id);
      if let Some(record) = self.nodes.remove(&removed_id) {
        removed.push(record);
      }
    }

    Ok(removed)
  }
}
