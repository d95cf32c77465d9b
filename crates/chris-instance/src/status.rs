//! Instance status state machine.
//!
//! ```text
//! created -> waiting -> scheduled -> started -> registeringFiles -> finishedSuccessfully
//!                          |            |              |
//!                          +------------+--------------+--> finishedWithError
//!
//! any non-terminal state -> cancelled
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InstanceError;
use crate::record::InstanceId;

/// Execution status of a plugin instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
  #[default]
  Created,
  Waiting,
  Scheduled,
  Started,
  RegisteringFiles,
  FinishedSuccessfully,
  FinishedWithError,
  Cancelled,
}

use InstanceStatus::*;

impl InstanceStatus {
  pub const ALL: [InstanceStatus; 8] = [
    Created,
    Waiting,
    Scheduled,
    Started,
    RegisteringFiles,
    FinishedSuccessfully,
    FinishedWithError,
    Cancelled,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Created => "created",
      Waiting => "waiting",
      Scheduled => "scheduled",
      Started => "started",
      RegisteringFiles => "registeringFiles",
      FinishedSuccessfully => "finishedSuccessfully",
      FinishedWithError => "finishedWithError",
      Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, FinishedSuccessfully | FinishedWithError | Cancelled)
  }

  /// Statuses reachable from `self` in one step.
  pub fn allowed_transitions(self) -> &'static [InstanceStatus] {
    match self {
      Created => &[Waiting, Cancelled],
      Waiting => &[Scheduled, Cancelled],
      Scheduled => &[Started, FinishedWithError, Cancelled],
      Started => &[RegisteringFiles, FinishedWithError, Cancelled],
      RegisteringFiles => &[FinishedSuccessfully, FinishedWithError, Cancelled],
      FinishedSuccessfully | FinishedWithError | Cancelled => &[],
    }
  }

  pub fn can_transition_to(self, to: InstanceStatus) -> bool {
    self.allowed_transitions().contains(&to)
  }
}

/// Check a status edge for the given instance.
pub fn validate_transition(
  id: InstanceId,
  from: InstanceStatus,
  to: InstanceStatus,
) -> Result<(), InstanceError> {
  if from.can_transition_to(to) {
    Ok(())
  } else {
    Err(InstanceError::InvalidTransition { id, from, to })
  }
}

impl fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for InstanceStatus {
  type Err = InstanceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    InstanceStatus::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| InstanceError::validation("status", format!("unknown status {:?}", s)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_success_path_is_linear() {
    let path = [
      Created,
      Waiting,
      Scheduled,
      Started,
      RegisteringFiles,
      FinishedSuccessfully,
    ];
    for pair in path.windows(2) {
      assert!(validate_transition(1, pair[0], pair[1]).is_ok());
    }

    // No skipping on the success path.
    assert!(validate_transition(1, Created, Scheduled).is_err());
    assert!(validate_transition(1, Started, FinishedSuccessfully).is_err());
  }

  #[test]
  fn test_no_backwards_edges() {
    let err = validate_transition(7, Started, Waiting).unwrap_err();
    assert_eq!(
      err,
      InstanceError::InvalidTransition {
        id: 7,
        from: Started,
        to: Waiting
      }
    );
    assert!(validate_transition(7, Waiting, Waiting).is_err());
  }

  #[test]
  fn test_cancel_from_every_non_terminal_state() {
    for status in InstanceStatus::ALL {
      assert_eq!(status.can_transition_to(Cancelled), !status.is_terminal());
    }
  }

  #[test]
  fn test_terminal_states_are_final() {
    for from in [FinishedSuccessfully, FinishedWithError, Cancelled] {
      for to in InstanceStatus::ALL {
        assert!(validate_transition(1, from, to).is_err());
      }
    }
  }

  #[test]
  fn test_string_round_trip() {
    for status in InstanceStatus::ALL {
      assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
      let json = serde_json::to_string(&status).unwrap();
      assert_eq!(json, format!("\"{}\"", status.as_str()));
    }
    assert!("finished".parse::<InstanceStatus>().is_err());
  }
}
