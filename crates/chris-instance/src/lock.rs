//! Per-instance locks and the split ledger.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InstanceError;
use crate::record::InstanceId;

pub type SplitId = u64;

/// Maximum length of a split filter expression.
pub const MAX_FILTER_LEN: usize = 600;

/// At most one lock per instance. A lock's existence means fan-out or
/// scheduling of that instance is claimed.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
  locked: BTreeSet<InstanceId>,
}

impl LockTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn acquire(&mut self, id: InstanceId) -> Result<(), InstanceError> {
    if self.locked.insert(id) {
      Ok(())
    } else {
      Err(InstanceError::AlreadyLocked { id })
    }
  }

  /// Remove the lock. Returns whether one was held.
  pub fn release(&mut self, id: InstanceId) -> bool {
    self.locked.remove(&id)
  }

  pub fn is_locked(&self, id: InstanceId) -> bool {
    self.locked.contains(&id)
  }

  pub fn iter(&self) -> impl Iterator<Item = InstanceId> + '_ {
    self.locked.iter().copied()
  }
}

/// A recorded fan-out: which filter selected the children and which
/// instances were created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
  pub id: SplitId,
  pub plugin_inst: InstanceId,
  pub creation_date: DateTime<Utc>,
  pub filter: String,
  pub created_plugin_inst_ids: Vec<InstanceId>,
}

impl SplitRecord {
  /// Created ids as a comma separated list, e.g. "2,3".
  pub fn created_ids_string(&self) -> String {
    self
      .created_plugin_inst_ids
      .iter()
      .map(|id| id.to_string())
      .collect::<Vec<_>>()
      .join(",")
  }
}

/// Append-only split history.
#[derive(Debug, Clone, Default)]
pub struct SplitLedger {
  records: Vec<SplitRecord>,
}

impl SplitLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, record: SplitRecord) {
    self.records.push(record);
  }

  /// Splits of one instance, most recent first.
  pub fn for_instance(&self, id: InstanceId) -> Vec<SplitRecord> {
    let mut splits: Vec<SplitRecord> = self
      .records
      .iter()
      .filter(|s| s.plugin_inst == id)
      .cloned()
      .collect();
    splits.sort_by(|a, b| {
      b.creation_date
        .cmp(&a.creation_date)
        .then_with(|| b.id.cmp(&a.id))
    });
    splits
  }

  pub fn iter(&self) -> impl Iterator<Item = &SplitRecord> {
    self.records.iter()
  }

  /// Drop the history of a deleted instance.
  pub fn remove_instance(&mut self, id: InstanceId) {
    self.records.retain(|s| s.plugin_inst != id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_lock_is_exclusive() {
    let mut locks = LockTable::new();
    locks.acquire(1).unwrap();
    assert_eq!(locks.acquire(1), Err(InstanceError::AlreadyLocked { id: 1 }));
    assert!(locks.acquire(2).is_ok());

    assert!(locks.release(1));
    assert!(!locks.release(1));
    assert!(locks.acquire(1).is_ok());
  }

  #[test]
  fn test_splits_most_recent_first() {
    let mut ledger = SplitLedger::new();
    let t = |s| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, s).unwrap();

    for (id, parent, second) in [(1, 7, 0), (2, 7, 5), (3, 8, 1), (4, 7, 5)] {
      ledger.append(SplitRecord {
        id,
        plugin_inst: parent,
        creation_date: t(second),
        filter: String::new(),
        created_plugin_inst_ids: vec![],
      });
    }

    let ids: Vec<_> = ledger.for_instance(7).iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![4, 2, 1]);

    ledger.remove_instance(7);
    assert!(ledger.for_instance(7).is_empty());
    assert_eq!(ledger.for_instance(8).len(), 1);
  }

  #[test]
  fn test_created_ids_string() {
    let split = SplitRecord {
      id: 1,
      plugin_inst: 1,
      creation_date: Utc::now(),
      filter: "status=waiting".to_string(),
      created_plugin_inst_ids: vec![2, 3],
    };
    assert_eq!(split.created_ids_string(), "2,3");
  }
}
