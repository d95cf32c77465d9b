use thiserror::Error;

use crate::record::InstanceId;
use crate::status::InstanceStatus;
use chris_plugin::ParameterId;

/// Errors returned by instance graph operations.
///
/// Nothing is retried internally; every error goes straight back to the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InstanceError {
  /// A creation or update request is malformed.
  #[error("invalid {field}: {message}")]
  Validation { field: &'static str, message: String },

  /// The stored status did not match the caller's expected status.
  #[error("status conflict on instance {id}: expected {expected}, found {actual}")]
  Conflict {
    id: InstanceId,
    expected: InstanceStatus,
    actual: InstanceStatus,
  },

  /// The requested status edge is not part of the state machine.
  #[error("invalid status transition on instance {id}: {from} -> {to}")]
  InvalidTransition {
    id: InstanceId,
    from: InstanceStatus,
    to: InstanceStatus,
  },

  /// Another actor holds the instance lock.
  #[error("instance {id} is already locked")]
  AlreadyLocked { id: InstanceId },

  /// The parameter is already bound on this instance.
  #[error("parameter {parameter_id} is already bound on instance {instance_id}")]
  DuplicateParameter {
    instance_id: InstanceId,
    parameter_id: ParameterId,
  },

  /// An output file with the same name is already registered.
  #[error("output file already registered: {fname}")]
  DuplicateFile { fname: String },

  /// A referenced record does not exist.
  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: u64 },

  /// The tree is broken: a non-root node without a parent, a dangling parent
  /// link or a cycle.
  #[error("broken instance tree at {id}: {message}")]
  Integrity { id: InstanceId, message: String },
}

impl InstanceError {
  pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
    InstanceError::Validation {
      field,
      message: message.into(),
    }
  }

  pub(crate) fn instance_not_found(id: InstanceId) -> Self {
    InstanceError::NotFound {
      kind: "plugin instance",
      id,
    }
  }

  /// Whether the caller may retry the same request later.
  pub fn is_retriable(&self) -> bool {
    matches!(
      self,
      InstanceError::AlreadyLocked { .. } | InstanceError::Conflict { .. }
    )
  }
}
