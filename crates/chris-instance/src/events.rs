//! Instance events and notifiers.
//!
//! The store emits an event after every committed change so schedulers and
//! API layers can react without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::lock::SplitId;
use crate::record::{FeedId, InstanceId};
use crate::status::InstanceStatus;

/// Events emitted by [`crate::InstanceStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceEvent {
  /// An instance was created.
  Created {
    instance_id: InstanceId,
    feed_id: FeedId,
    previous: Option<InstanceId>,
  },

  /// An instance changed status.
  StatusChanged {
    instance_id: InstanceId,
    from: InstanceStatus,
    to: InstanceStatus,
  },

  /// A split was recorded for an instance.
  Split {
    instance_id: InstanceId,
    split_id: SplitId,
    created_ids: Vec<InstanceId>,
  },

  /// Instances were deleted (a subtree, root first is not guaranteed).
  Deleted { instance_ids: Vec<InstanceId> },
}

/// Receives instance events.
pub trait InstanceNotifier: Send + Sync {
  fn notify(&self, event: InstanceEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl InstanceNotifier for NoopNotifier {
  fn notify(&self, _event: InstanceEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<InstanceEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<InstanceEvent>) -> Self {
    Self { sender }
  }
}

impl InstanceNotifier for ChannelNotifier {
  fn notify(&self, event: InstanceEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
