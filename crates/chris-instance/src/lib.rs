//! ChRIS Instance
//!
//! The plugin-instance execution graph. Every plugin run is an
//! [`InstanceRecord`] linked to the instance whose output it consumes, forming
//! a forest of trees rooted at data-source runs. Each tree belongs to exactly
//! one [`Feed`].
//!
//! [`InstanceStore`] is the entry point. It covers:
//! - creation with feed binding and resource-limit defaulting
//! - the status state machine, with compare-and-set transitions
//! - tree navigation and output path derivation
//! - per-instance locks and the split ledger used for fan-out
//! - typed parameter bindings
//! - declarative queries over the graph
//! - output file registration

mod clock;
mod error;
mod events;
mod feed;
mod file;
mod graph;
mod lock;
mod parameter;
mod query;
mod record;
mod status;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::InstanceError;
pub use events::{ChannelNotifier, InstanceEvent, InstanceNotifier, NoopNotifier};
pub use feed::{Feed, FeedBinding, bind_feed};
pub use file::{FileFilter, FileId, FileLedger, InstanceFile, MAX_FNAME_LEN};
pub use graph::InstanceGraph;
pub use lock::{LockTable, MAX_FILTER_LEN, SplitId, SplitLedger, SplitRecord};
pub use parameter::{
  MAX_PATH_LEN, MAX_STRING_LEN, ParameterBinding, ParameterStore, ParameterValue,
};
pub use query::InstanceFilter;
pub use record::{
  FeedId, InstanceId, InstanceRecord, InstanceUpdate, MAX_ERROR_CODE_LEN, MAX_SUMMARY_LEN,
  MAX_TITLE_LEN, NewInstance, PipelineInstanceId, PluginRef, ResolvedLimits, ResourceLimits,
};
pub use status::{InstanceStatus, validate_transition};
pub use store::{InstanceStore, Snapshot};
