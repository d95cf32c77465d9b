//! Output files registered while an instance is in `registeringFiles`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InstanceError;
use crate::record::{FeedId, InstanceId};

pub type FileId = u64;

pub const MAX_FNAME_LEN: usize = 1024;

/// A file produced by a plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFile {
  pub id: FileId,
  pub creation_date: DateTime<Utc>,
  /// Storage path of the file; unique across all instances.
  pub fname: String,
  pub plugin_inst: InstanceId,
  pub feed: FeedId,
}

/// Criteria for listing files. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilter {
  pub id: Option<FileId>,
  pub min_creation_date: Option<DateTime<Utc>>,
  pub max_creation_date: Option<DateTime<Utc>>,
  pub plugin_inst_id: Option<InstanceId>,
  pub feed_id: Option<FeedId>,
  /// Prefix match on `fname`.
  pub fname: Option<String>,
  pub fname_exact: Option<String>,
}

impl FileFilter {
  pub fn matches(&self, file: &InstanceFile) -> bool {
    self.id.is_none_or(|id| file.id == id)
      && self
        .min_creation_date
        .is_none_or(|min| file.creation_date >= min)
      && self
        .max_creation_date
        .is_none_or(|max| file.creation_date <= max)
      && self.plugin_inst_id.is_none_or(|id| file.plugin_inst == id)
      && self.feed_id.is_none_or(|id| file.feed == id)
      && self
        .fname
        .as_deref()
        .is_none_or(|prefix| file.fname.starts_with(prefix))
      && self
        .fname_exact
        .as_deref()
        .is_none_or(|exact| file.fname == exact)
  }
}

#[derive(Debug, Clone, Default)]
pub struct FileLedger {
  files: BTreeMap<FileId, InstanceFile>,
  fnames: HashSet<String>,
}

impl FileLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, file: InstanceFile) -> Result<(), InstanceError> {
    crate::record::check_len("fname", &file.fname, MAX_FNAME_LEN)?;
    if file.fname.is_empty() {
      return Err(InstanceError::validation("fname", "must not be empty"));
    }
    if !self.fnames.insert(file.fname.clone()) {
      return Err(InstanceError::DuplicateFile { fname: file.fname });
    }
    self.files.insert(file.id, file);
    Ok(())
  }

  /// Files matching `filter`, ordered by `fname` descending.
  pub fn list(&self, filter: &FileFilter) -> Vec<InstanceFile> {
    let mut files: Vec<InstanceFile> = self
      .files
      .values()
      .filter(|f| filter.matches(f))
      .cloned()
      .collect();
    files.sort_by(|a, b| b.fname.cmp(&a.fname));
    files
  }

  pub fn iter(&self) -> impl Iterator<Item = &InstanceFile> {
    self.files.values()
  }

  pub fn remove_instance(&mut self, id: InstanceId) {
    let fnames = &mut self.fnames;
    self.files.retain(|_, f| {
      if f.plugin_inst == id {
        fnames.remove(&f.fname);
        false
      } else {
        true
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn file(id: FileId, fname: &str, plugin_inst: InstanceId) -> InstanceFile {
    InstanceFile {
      id,
      creation_date: Utc::now(),
      fname: fname.to_string(),
      plugin_inst,
      feed: 1,
    }
  }

  #[test]
  fn test_unique_fname() {
    let mut ledger = FileLedger::new();
    ledger.insert(file(1, "alice/feed_1/a.txt", 1)).unwrap();
    let err = ledger.insert(file(2, "alice/feed_1/a.txt", 2)).unwrap_err();
    assert_eq!(
      err,
      InstanceError::DuplicateFile {
        fname: "alice/feed_1/a.txt".to_string()
      }
    );
  }

  #[test]
  fn test_list_filters_and_orders() {
    let mut ledger = FileLedger::new();
    ledger.insert(file(1, "alice/feed_1/dircopy_1/data/a.txt", 1)).unwrap();
    ledger.insert(file(2, "alice/feed_1/dircopy_1/data/b.txt", 1)).unwrap();
    ledger.insert(file(3, "bob/feed_2/dircopy_5/data/c.txt", 5)).unwrap();

    let names: Vec<_> = ledger
      .list(&FileFilter {
        fname: Some("alice/".to_string()),
        ..Default::default()
      })
      .into_iter()
      .map(|f| f.id)
      .collect();
    assert_eq!(names, vec![2, 1]);

    let exact = ledger.list(&FileFilter {
      fname_exact: Some("bob/feed_2/dircopy_5/data/c.txt".to_string()),
      ..Default::default()
    });
    assert_eq!(exact.len(), 1);

    let by_instance = ledger.list(&FileFilter {
      plugin_inst_id: Some(5),
      ..Default::default()
    });
    assert_eq!(by_instance[0].id, 3);
  }

  #[test]
  fn test_remove_instance_frees_fname() {
    let mut ledger = FileLedger::new();
    ledger.insert(file(1, "a", 1)).unwrap();
    ledger.remove_instance(1);
    assert!(ledger.insert(file(2, "a", 2)).is_ok());
  }
}
