//! ChRIS Store
//!
//! This crate persists the plugin catalog and the plugin instance graph.
//! Data is stored in SQLite through `sqlx`.
//!
//! The [`Store`] trait defines operations for:
//! - Registering plugins, plugin parameters and compute resources
//! - Inserting and updating instances, with compare-and-set status updates
//! - Per-instance locks backed by a primary key
//! - Split history, parameter bindings and output files
//! - Loading and saving a full [`chris_instance::Snapshot`]

mod sqlite;
mod types;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chris_instance::{
  Feed, InstanceError, InstanceFile, InstanceId, InstanceRecord, InstanceStatus, InstanceStore,
  ParameterBinding, Snapshot, SplitRecord,
};
use chris_plugin::{ComputeResource, InMemoryCatalog, Plugin, PluginParameter};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A compare-and-set status update lost the race.
  #[error("status conflict on instance {id}: expected {expected}, found {actual}")]
  Conflict {
    id: InstanceId,
    expected: InstanceStatus,
    actual: InstanceStatus,
  },

  /// A lock row already exists for the instance.
  #[error("instance {0} is already locked")]
  AlreadyLocked(InstanceId),

  /// A row could not be converted back into a domain value.
  #[error("corrupt {table} row: {message}")]
  Corrupt {
    table: &'static str,
    message: String,
  },

  /// An id does not fit in a signed 64-bit SQLite integer.
  #[error("id {0} exceeds the SQLite integer range")]
  IdOutOfRange(u64),

  /// Rebuilding the in-memory graph failed.
  #[error(transparent)]
  Instance(#[from] InstanceError),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running the embedded migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Everything written for one freshly created instance: the feed it started
/// (roots only), the record itself and its parameter bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedInstance {
  pub feed: Option<Feed>,
  pub record: InstanceRecord,
  pub bindings: Vec<ParameterBinding>,
}

impl CreatedInstance {
  /// Collect the rows of `record` from the graph that created it.
  pub fn from_graph(graph: &InstanceStore, record: InstanceRecord) -> Result<Self, InstanceError> {
    let feed = if record.is_root() {
      Some(graph.feed(record.feed)?)
    } else {
      None
    };
    let bindings = graph.parameters(record.id)?;
    Ok(Self {
      feed,
      record,
      bindings,
    })
  }
}

/// Storage trait for the plugin catalog and the instance graph.
#[async_trait]
pub trait Store: Send + Sync {
  /// Register a plugin.
  async fn insert_plugin(&self, plugin: &Plugin) -> Result<(), Error>;

  /// Register a plugin parameter.
  async fn insert_plugin_parameter(&self, parameter: &PluginParameter) -> Result<(), Error>;

  /// Register a compute resource.
  async fn insert_compute_resource(&self, resource: &ComputeResource) -> Result<(), Error>;

  /// Remove a compute resource. Referencing instances keep running with a
  /// null compute resource. Returns whether a row was removed.
  async fn delete_compute_resource(&self, id: u64) -> Result<bool, Error>;

  /// Rebuild the catalog from the stored plugins, parameters and resources.
  async fn load_catalog(&self) -> Result<InMemoryCatalog, Error>;

  /// Insert a feed with its owners.
  async fn insert_feed(&self, feed: &Feed) -> Result<(), Error>;

  /// Insert an instance. Its feed and parent must already be stored.
  async fn insert_instance(&self, record: &InstanceRecord) -> Result<(), Error>;

  /// Insert a created instance with its feed and bindings in one transaction.
  async fn insert_created(&self, created: &CreatedInstance) -> Result<(), Error>;

  /// Get an instance by ID.
  async fn get_instance(&self, id: InstanceId) -> Result<InstanceRecord, Error>;

  /// Overwrite the descriptive fields of an instance. Status, `end_date`,
  /// parent, plugin, feed and owner are left alone.
  async fn update_instance(&self, record: &InstanceRecord) -> Result<(), Error>;

  /// Set `status` only if the stored status is still `expected`.
  async fn update_status(
    &self,
    id: InstanceId,
    expected: InstanceStatus,
    new: InstanceStatus,
    end_date: Option<DateTime<Utc>>,
  ) -> Result<(), Error>;

  /// Cancel an instance from whatever non-terminal status it is in.
  async fn cancel(&self, id: InstanceId, end_date: Option<DateTime<Utc>>) -> Result<(), Error>;

  /// Delete an instance; descendants and dependent rows cascade.
  async fn delete_instance(&self, id: InstanceId) -> Result<(), Error>;

  /// Store a parameter binding.
  async fn insert_binding(&self, binding: &ParameterBinding) -> Result<(), Error>;

  /// Take the lock on an instance.
  async fn insert_lock(&self, id: InstanceId) -> Result<(), Error>;

  /// Drop the lock on an instance. Returns whether a lock was held.
  async fn delete_lock(&self, id: InstanceId) -> Result<bool, Error>;

  /// Append a split record.
  async fn insert_split(&self, split: &SplitRecord) -> Result<(), Error>;

  /// Insert the children of a split and the split record in one transaction.
  /// Nothing is written if any row fails.
  async fn insert_split_with_children(
    &self,
    split: &SplitRecord,
    children: &[CreatedInstance],
  ) -> Result<(), Error>;

  /// Split records of an instance, most recent first.
  async fn list_splits(&self, id: InstanceId) -> Result<Vec<SplitRecord>, Error>;

  /// Register an output file.
  async fn insert_file(&self, file: &InstanceFile) -> Result<(), Error>;

  /// Read the whole instance graph.
  async fn load_snapshot(&self) -> Result<Snapshot, Error>;

  /// Replace the whole instance graph with `snapshot`.
  async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error>;
}
