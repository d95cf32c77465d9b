//! Feed binding.
//!
//! A data-source instance opens a new feed; every other instance joins the
//! feed of its parent. The decision is made before anything is stored so a
//! rejected request leaves no feed behind.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chris_plugin::Plugin;

use crate::error::InstanceError;
use crate::record::{FeedId, InstanceRecord};

/// The logical result collection of one instance tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
  pub id: FeedId,
  pub name: String,
  pub owners: BTreeSet<String>,
  pub creation_date: DateTime<Utc>,
}

/// How a new instance gets its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedBinding {
  /// Open a new feed with this name, owned by this user.
  Create { name: String, owner: String },
  /// Join an existing feed.
  Inherit(FeedId),
}

/// Decide the feed of a new instance from its plugin and parent.
pub fn bind_feed(
  plugin: &Plugin,
  previous: Option<&InstanceRecord>,
  title: &str,
  owner: &str,
) -> Result<FeedBinding, InstanceError> {
  match (plugin.plugin_type.is_data_source(), previous) {
    (true, None) => {
      let name = if title.is_empty() {
        plugin.name.clone()
      } else {
        title.to_string()
      };
      Ok(FeedBinding::Create {
        name,
        owner: owner.to_string(),
      })
    }
    (false, Some(previous)) => Ok(FeedBinding::Inherit(previous.feed)),
    (true, Some(previous)) => Err(InstanceError::validation(
      "previous",
      format!(
        "plugin '{}' is of type {} and cannot have a previous instance (got {})",
        plugin.name, plugin.plugin_type, previous.id
      ),
    )),
    (false, None) => Err(InstanceError::validation(
      "previous",
      format!(
        "plugin '{}' is of type {} and requires a previous instance",
        plugin.name, plugin.plugin_type
      ),
    )),
  }
}

impl Feed {
  pub fn new(id: FeedId, name: String, owner: String, creation_date: DateTime<Utc>) -> Self {
    Self {
      id,
      name,
      owners: BTreeSet::from([owner]),
      creation_date,
    }
  }
}
