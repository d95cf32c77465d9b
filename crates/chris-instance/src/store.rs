//! Thread-safe instance store.
//!
//! [`InstanceStore`] owns the instance graph together with feeds, parameter
//! bindings, locks, splits and output files, and exposes the operations the
//! API layer, scheduler and worker callbacks call concurrently. Every
//! operation runs under a single read or write lock over that state, so a
//! status compare-and-set or a split is atomic with respect to every other
//! operation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use chris_config::InstanceSettings;
use chris_plugin::{ComputeResourceId, ParameterId, Plugin, PluginCatalog, PluginParameter};

use crate::clock::{Clock, SystemClock};
use crate::error::InstanceError;
use crate::events::{InstanceEvent, InstanceNotifier, NoopNotifier};
use crate::feed::{Feed, FeedBinding, bind_feed};
use crate::file::{FileFilter, FileLedger, InstanceFile};
use crate::graph::InstanceGraph;
use crate::lock::{LockTable, MAX_FILTER_LEN, SplitLedger, SplitRecord};
use crate::parameter::{ParameterBinding, ParameterStore, ParameterValue};
use crate::query::InstanceFilter;
use crate::record::{
  FeedId, InstanceId, InstanceRecord, InstanceUpdate, MAX_ERROR_CODE_LEN, MAX_SUMMARY_LEN,
  MAX_TITLE_LEN, NewInstance, PipelineInstanceId, PluginRef, ResolvedLimits, ResourceLimits,
  check_len,
};
use crate::status::{InstanceStatus, validate_transition};

/// Last id handed out per table. Ids are never reused.
#[derive(Debug, Clone, Copy, Default)]
struct IdCounters {
  instance: u64,
  feed: u64,
  split: u64,
  file: u64,
}

fn bump(counter: &mut u64) -> u64 {
  *counter += 1;
  *counter
}

#[derive(Debug, Default)]
struct State {
  graph: InstanceGraph,
  feeds: BTreeMap<FeedId, Feed>,
  parameters: ParameterStore,
  locks: LockTable,
  splits: SplitLedger,
  files: FileLedger,
  ids: IdCounters,
}

impl State {
  fn require(&self, id: InstanceId) -> Result<&InstanceRecord, InstanceError> {
    self
      .graph
      .get(id)
      .ok_or_else(|| InstanceError::instance_not_found(id))
  }
}

/// A validated creation request, ready to be committed.
struct PreparedInstance {
  id: InstanceId,
  plugin: Plugin,
  feed: FeedBinding,
  title: String,
  owner: String,
  previous: Option<InstanceId>,
  compute_resource: Option<ComputeResourceId>,
  pipeline_inst: Option<PipelineInstanceId>,
  limits: ResolvedLimits,
  bindings: Vec<ParameterBinding>,
}

/// Full store contents, used to move state in and out of persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub feeds: Vec<Feed>,
  pub instances: Vec<InstanceRecord>,
  pub parameters: Vec<ParameterBinding>,
  pub locks: Vec<InstanceId>,
  pub splits: Vec<SplitRecord>,
  pub files: Vec<InstanceFile>,
}

/// The plugin instance store.
pub struct InstanceStore {
  catalog: Arc<dyn PluginCatalog>,
  settings: InstanceSettings,
  clock: Arc<dyn Clock>,
  notifier: Arc<dyn InstanceNotifier>,
  state: RwLock<State>,
}

impl InstanceStore {
  /// Create an empty store.
  pub fn new(catalog: Arc<dyn PluginCatalog>, settings: InstanceSettings) -> Self {
    Self {
      catalog,
      settings,
      clock: Arc::new(SystemClock),
      notifier: Arc::new(NoopNotifier),
      state: RwLock::new(State::default()),
    }
  }

  /// Use a different timestamp source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Send events to `notifier` instead of discarding them.
  pub fn with_notifier(mut self, notifier: Arc<dyn InstanceNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn settings(&self) -> &InstanceSettings {
    &self.settings
  }

  // ---------------------------------------------------------------------------
  // Creation
  // ---------------------------------------------------------------------------

  /// Create a plugin instance.
  ///
  /// Validates the request, derives the feed (new for data-source plugins,
  /// inherited otherwise) and resource limits, then stores the record and its
  /// parameter bindings. A rejected request stores nothing.
  #[instrument(
    name = "create_instance",
    skip(self, request),
    fields(plugin_id = request.plugin_id, owner = %request.owner)
  )]
  pub fn create_instance(&self, request: NewInstance) -> Result<InstanceRecord, InstanceError> {
    let record = {
      let mut state = self.state.write();
      let prepared = self.prepare(&state, request)?;
      self.commit(&mut state, prepared)?
    };

    self.created(&record);
    Ok(record)
  }

  fn created(&self, record: &InstanceRecord) {
    info!(
      instance_id = record.id,
      feed_id = record.feed,
      plugin = %record.plugin.name,
      previous = ?record.previous,
      "instance_created"
    );
    self.notifier.notify(InstanceEvent::Created {
      instance_id: record.id,
      feed_id: record.feed,
      previous: record.previous,
    });
  }

  fn prepare(
    &self,
    state: &State,
    request: NewInstance,
  ) -> Result<PreparedInstance, InstanceError> {
    if request.owner.is_empty() {
      return Err(InstanceError::validation("owner", "must not be empty"));
    }
    let title = request.title.unwrap_or_default();
    check_len("title", &title, MAX_TITLE_LEN)?;

    let plugin = self.catalog.plugin(request.plugin_id).ok_or_else(|| {
      InstanceError::validation(
        "plugin",
        format!("plugin {} does not exist", request.plugin_id),
      )
    })?;

    let previous = match request.previous {
      Some(previous_id) => Some(state.graph.get(previous_id).ok_or_else(|| {
        InstanceError::validation(
          "previous",
          format!("plugin instance {} does not exist", previous_id),
        )
      })?),
      None => None,
    };

    let feed = bind_feed(&plugin, previous, &title, &request.owner)?;

    if let Some(resource_id) = request.compute_resource
      && self.catalog.compute_resource(resource_id).is_none()
    {
      return Err(InstanceError::validation(
        "compute_resource",
        format!("compute resource {} does not exist", resource_id),
      ));
    }

    let id = state.ids.instance + 1;
    let mut seen = HashSet::new();
    let mut bindings = Vec::with_capacity(request.parameters.len());
    for (parameter_id, value) in request.parameters {
      let parameter = self.plugin_parameter(&plugin, parameter_id)?;
      if !seen.insert(parameter_id) {
        return Err(InstanceError::DuplicateParameter {
          instance_id: id,
          parameter_id,
        });
      }
      bindings.push(ParameterBinding::new(id, &parameter, value)?);
    }

    Ok(PreparedInstance {
      id,
      limits: request.limits.resolve(&plugin),
      plugin,
      feed,
      title,
      owner: request.owner,
      previous: request.previous,
      compute_resource: request.compute_resource,
      pipeline_inst: request.pipeline_inst,
      bindings,
    })
  }

  fn commit(
    &self,
    state: &mut State,
    prepared: PreparedInstance,
  ) -> Result<InstanceRecord, InstanceError> {
    let now = self.clock.now();

    let (feed_id, new_feed) = match prepared.feed {
      FeedBinding::Create { name, owner } => {
        let feed_id = bump(&mut state.ids.feed);
        (feed_id, Some(Feed::new(feed_id, name, owner, now)))
      }
      FeedBinding::Inherit(feed_id) => (feed_id, None),
    };

    let record = InstanceRecord {
      id: prepared.id,
      title: prepared.title,
      status: InstanceStatus::Created,
      start_date: now,
      end_date: now,
      summary: String::new(),
      raw: String::new(),
      error_code: String::new(),
      previous: prepared.previous,
      plugin: PluginRef::from(&prepared.plugin),
      feed: feed_id,
      owner: prepared.owner,
      compute_resource: prepared.compute_resource,
      pipeline_inst: prepared.pipeline_inst,
      limits: prepared.limits,
    };

    state.graph.insert(record.clone())?;
    state.ids.instance = prepared.id;
    if let Some(feed) = new_feed {
      debug!(feed_id = feed.id, name = %feed.name, "feed_created");
      state.feeds.insert(feed.id, feed);
    }
    for binding in prepared.bindings {
      state.parameters.bind(binding)?;
    }

    Ok(record)
  }

  fn plugin_parameter(
    &self,
    plugin: &Plugin,
    parameter_id: ParameterId,
  ) -> Result<PluginParameter, InstanceError> {
    match self.catalog.parameter(parameter_id) {
      Some(parameter) if parameter.plugin_id == plugin.id => Ok(parameter),
      Some(parameter) => Err(InstanceError::validation(
        "parameters",
        format!(
          "parameter '{}' ({}) does not belong to plugin '{}'",
          parameter.name, parameter_id, plugin.name
        ),
      )),
      None => Err(InstanceError::validation(
        "parameters",
        format!("plugin parameter {} does not exist", parameter_id),
      )),
    }
  }

  fn instance_plugin(&self, record: &InstanceRecord) -> Result<Plugin, InstanceError> {
    self
      .catalog
      .plugin(record.plugin.id)
      .ok_or(InstanceError::NotFound {
        kind: "plugin",
        id: record.plugin.id,
      })
  }

  // ---------------------------------------------------------------------------
  // Reads and updates
  // ---------------------------------------------------------------------------

  pub fn get(&self, id: InstanceId) -> Result<InstanceRecord, InstanceError> {
    self.state.read().require(id).cloned()
  }

  /// Update diagnostics, title, compute resource or limits.
  ///
  /// Limits are re-defaulted from the plugin minimums after every update.
  #[instrument(name = "update_instance", skip(self, update))]
  pub fn update_instance(
    &self,
    id: InstanceId,
    update: InstanceUpdate,
  ) -> Result<InstanceRecord, InstanceError> {
    if let Some(title) = &update.title {
      check_len("title", title, MAX_TITLE_LEN)?;
    }
    if let Some(summary) = &update.summary {
      check_len("summary", summary, MAX_SUMMARY_LEN)?;
    }
    if let Some(error_code) = &update.error_code {
      check_len("error_code", error_code, MAX_ERROR_CODE_LEN)?;
    }
    if let Some(Some(resource_id)) = update.compute_resource
      && self.catalog.compute_resource(resource_id).is_none()
    {
      return Err(InstanceError::validation(
        "compute_resource",
        format!("compute resource {} does not exist", resource_id),
      ));
    }

    let mut state = self.state.write();
    let plugin = self.instance_plugin(state.require(id)?)?;
    let record = state
      .graph
      .get_mut(id)
      .ok_or_else(|| InstanceError::instance_not_found(id))?;

    if let Some(title) = update.title {
      record.title = title;
    }
    if let Some(summary) = update.summary {
      record.summary = summary;
    }
    if let Some(raw) = update.raw {
      record.raw = raw;
    }
    if let Some(error_code) = update.error_code {
      record.error_code = error_code;
    }
    if let Some(compute_resource) = update.compute_resource {
      record.compute_resource = compute_resource;
    }
    let requested = update
      .limits
      .unwrap_or_else(|| ResourceLimits::from(record.limits));
    record.limits = requested.resolve(&plugin);

    debug!(instance_id = id, "instance_updated");
    Ok(record.clone())
  }

  // ---------------------------------------------------------------------------
  // Status
  // ---------------------------------------------------------------------------

  /// Move an instance from `expected` to `new`.
  ///
  /// Fails with `Conflict` if the stored status is no longer `expected`, and
  /// with `InvalidTransition` if `expected -> new` is not a legal edge. A
  /// request for `cancelled` only requires the instance to be non-terminal.
  #[instrument(
    name = "transition_status",
    skip(self, expected, new),
    fields(expected = %expected, new = %new)
  )]
  pub fn transition_status(
    &self,
    id: InstanceId,
    expected: InstanceStatus,
    new: InstanceStatus,
  ) -> Result<InstanceRecord, InstanceError> {
    self.change_status(id, Some(expected), new)
  }

  /// Cancel an instance from whatever non-terminal status it is in.
  #[instrument(name = "cancel_instance", skip(self))]
  pub fn cancel(&self, id: InstanceId) -> Result<InstanceRecord, InstanceError> {
    self.change_status(id, None, InstanceStatus::Cancelled)
  }

  fn change_status(
    &self,
    id: InstanceId,
    expected: Option<InstanceStatus>,
    new: InstanceStatus,
  ) -> Result<InstanceRecord, InstanceError> {
    let (record, from) = {
      let mut state = self.state.write();
      let record = state
        .graph
        .get_mut(id)
        .ok_or_else(|| InstanceError::instance_not_found(id))?;
      let from = record.status;

      match (new, expected) {
        (InstanceStatus::Cancelled, _) | (_, None) => validate_transition(id, from, new)?,
        (_, Some(expected)) => {
          validate_transition(id, expected, new)?;
          if from != expected {
            warn!(instance_id = id, expected = %expected, actual = %from, "status_conflict");
            return Err(InstanceError::Conflict {
              id,
              expected,
              actual: from,
            });
          }
        }
      }

      record.status = new;
      if new.is_terminal() && self.settings.stamp_end_date_on_terminal {
        record.end_date = self.clock.now();
      }
      (record.clone(), from)
    };

    info!(instance_id = id, from = %from, to = %new, "status_changed");
    self.notifier.notify(InstanceEvent::StatusChanged {
      instance_id: id,
      from,
      to: new,
    });
    Ok(record)
  }

  // ---------------------------------------------------------------------------
  // Tree navigation
  // ---------------------------------------------------------------------------

  /// The data-source instance at the top of the tree containing `id`.
  pub fn get_root(&self, id: InstanceId) -> Result<InstanceRecord, InstanceError> {
    self.state.read().graph.root(id).cloned()
  }

  /// `id` itself plus all of its descendants, in no particular order.
  pub fn get_descendants(&self, id: InstanceId) -> Result<Vec<InstanceRecord>, InstanceError> {
    let state = self.state.read();
    let descendants = state.graph.descendants(id)?;
    Ok(descendants.into_iter().cloned().collect())
  }

  /// Direct children of `id`.
  pub fn children(&self, id: InstanceId) -> Result<Vec<InstanceRecord>, InstanceError> {
    let state = self.state.read();
    state.require(id)?;
    state
      .graph
      .children(id)
      .iter()
      .map(|child| state.require(*child).cloned())
      .collect()
  }

  /// Storage path for the output files of `id`.
  pub fn get_output_path(&self, id: InstanceId) -> Result<String, InstanceError> {
    self.state.read().graph.output_path(id)
  }

  // ---------------------------------------------------------------------------
  // Locks and splits
  // ---------------------------------------------------------------------------

  /// Claim the instance for fan-out or scheduling.
  #[instrument(name = "acquire_lock", skip(self))]
  pub fn acquire_lock(&self, id: InstanceId) -> Result<(), InstanceError> {
    let mut state = self.state.write();
    state.require(id)?;
    state.locks.acquire(id).inspect_err(|_| {
      debug!(instance_id = id, "lock_contended");
    })?;
    debug!(instance_id = id, "lock_acquired");
    Ok(())
  }

  /// Drop the instance lock. Releasing an unheld lock is a no-op; the return
  /// value tells whether a lock was held.
  #[instrument(name = "release_lock", skip(self))]
  pub fn release_lock(&self, id: InstanceId) -> bool {
    let released = self.state.write().locks.release(id);
    debug!(instance_id = id, released, "lock_released");
    released
  }

  pub fn is_locked(&self, id: InstanceId) -> bool {
    self.state.read().locks.is_locked(id)
  }

  /// Append a split record for `id`.
  #[instrument(name = "record_split", skip(self, filter, created_ids))]
  pub fn record_split(
    &self,
    id: InstanceId,
    filter: &str,
    created_ids: Vec<InstanceId>,
  ) -> Result<SplitRecord, InstanceError> {
    let split = {
      let mut state = self.state.write();
      state.require(id)?;
      check_len("filter", filter, MAX_FILTER_LEN)?;
      for created in &created_ids {
        state.require(*created)?;
      }
      self.append_split(&mut state, id, filter, created_ids)
    };

    self.split_recorded(&split);
    Ok(split)
  }

  fn append_split(
    &self,
    state: &mut State,
    id: InstanceId,
    filter: &str,
    created_ids: Vec<InstanceId>,
  ) -> SplitRecord {
    let split = SplitRecord {
      id: bump(&mut state.ids.split),
      plugin_inst: id,
      creation_date: self.clock.now(),
      filter: filter.to_string(),
      created_plugin_inst_ids: created_ids,
    };
    state.splits.append(split.clone());
    split
  }

  fn split_recorded(&self, split: &SplitRecord) {
    info!(
      instance_id = split.plugin_inst,
      split_id = split.id,
      created = %split.created_ids_string(),
      "split_recorded"
    );
    self.notifier.notify(InstanceEvent::Split {
      instance_id: split.plugin_inst,
      split_id: split.id,
      created_ids: split.created_plugin_inst_ids.clone(),
    });
  }

  /// Split records of `id`, most recent first.
  pub fn splits(&self, id: InstanceId) -> Result<Vec<SplitRecord>, InstanceError> {
    let state = self.state.read();
    state.require(id)?;
    Ok(state.splits.for_instance(id))
  }

  /// Fan `parent` out into `children` under `filter`.
  ///
  /// Holds the parent's lock while every child is created (each with
  /// `previous = parent`) and the split is appended, then releases it. Fails
  /// with `AlreadyLocked` if another actor holds the lock. If any child is
  /// rejected, the children created by this call are removed again and no
  /// split is recorded.
  #[instrument(name = "split_instance", skip(self, filter, children), fields(children = children.len()))]
  pub fn split_instance(
    &self,
    parent: InstanceId,
    filter: &str,
    children: Vec<NewInstance>,
  ) -> Result<(SplitRecord, Vec<InstanceRecord>), InstanceError> {
    let (split, created) = {
      let mut state = self.state.write();
      state.require(parent)?;
      state.locks.acquire(parent)?;
      let outcome = self.create_split_children(&mut state, parent, filter, children);
      state.locks.release(parent);
      outcome?
    };

    for record in &created {
      self.created(record);
    }
    self.split_recorded(&split);
    Ok((split, created))
  }

  fn create_split_children(
    &self,
    state: &mut State,
    parent: InstanceId,
    filter: &str,
    children: Vec<NewInstance>,
  ) -> Result<(SplitRecord, Vec<InstanceRecord>), InstanceError> {
    check_len("filter", filter, MAX_FILTER_LEN)?;

    let mut created: Vec<InstanceRecord> = Vec::with_capacity(children.len());
    for mut child in children {
      child.previous = Some(parent);
      let result = match self.prepare(state, child) {
        Ok(prepared) => self.commit(state, prepared),
        Err(e) => Err(e),
      };
      match result {
        Ok(record) => created.push(record),
        Err(e) => {
          warn!(instance_id = parent, error = %e, "split_rolled_back");
          for record in &created {
            // Fresh leaves: removal cannot fail.
            let _ = state.graph.remove_subtree(record.id);
            state.parameters.remove_instance(record.id);
          }
          return Err(e);
        }
      }
    }

    let ids = created.iter().map(|r| r.id).collect();
    let split = self.append_split(state, parent, filter, ids);
    Ok((split, created))
  }

  // ---------------------------------------------------------------------------
  // Parameters
  // ---------------------------------------------------------------------------

  /// Bind a parameter value on an existing instance.
  #[instrument(name = "bind_parameter", skip(self, value))]
  pub fn bind_parameter(
    &self,
    id: InstanceId,
    parameter_id: ParameterId,
    value: ParameterValue,
  ) -> Result<ParameterBinding, InstanceError> {
    let mut state = self.state.write();
    let plugin = self.instance_plugin(state.require(id)?)?;
    let parameter = self.plugin_parameter(&plugin, parameter_id)?;
    let binding = ParameterBinding::new(id, &parameter, value)?;
    state.parameters.bind(binding.clone())?;
    Ok(binding)
  }

  /// Replace the value of an existing binding.
  #[instrument(name = "update_parameter", skip(self, value))]
  pub fn update_parameter(
    &self,
    id: InstanceId,
    parameter_id: ParameterId,
    value: ParameterValue,
  ) -> Result<ParameterBinding, InstanceError> {
    let mut state = self.state.write();
    let plugin = self.instance_plugin(state.require(id)?)?;
    let parameter = self.plugin_parameter(&plugin, parameter_id)?;
    let binding = ParameterBinding::new(id, &parameter, value)?;
    state.parameters.update(binding.clone())?;
    Ok(binding)
  }

  /// Every parameter binding of `id`. No ordering across value kinds.
  pub fn parameters(&self, id: InstanceId) -> Result<Vec<ParameterBinding>, InstanceError> {
    let state = self.state.read();
    state.require(id)?;
    Ok(state.parameters.get_all(id))
  }

  // ---------------------------------------------------------------------------
  // Output files
  // ---------------------------------------------------------------------------

  #[instrument(name = "register_file", skip(self))]
  pub fn register_file(&self, id: InstanceId, fname: &str) -> Result<InstanceFile, InstanceError> {
    let mut state = self.state.write();
    let feed = state.require(id)?.feed;
    let file = InstanceFile {
      id: state.ids.file + 1,
      creation_date: self.clock.now(),
      fname: fname.to_string(),
      plugin_inst: id,
      feed,
    };
    state.files.insert(file.clone())?;
    state.ids.file = file.id;
    Ok(file)
  }

  pub fn files(&self, filter: &FileFilter) -> Vec<InstanceFile> {
    self.state.read().files.list(filter)
  }

  // ---------------------------------------------------------------------------
  // Query
  // ---------------------------------------------------------------------------

  pub fn query(&self, filter: &InstanceFilter) -> Result<Vec<InstanceRecord>, InstanceError> {
    filter.apply(&self.state.read().graph)
  }

  pub fn feed(&self, id: FeedId) -> Result<Feed, InstanceError> {
    self
      .state
      .read()
      .feeds
      .get(&id)
      .cloned()
      .ok_or(InstanceError::NotFound { kind: "feed", id })
  }

  pub fn feeds(&self) -> Vec<Feed> {
    self.state.read().feeds.values().cloned().collect()
  }

  // ---------------------------------------------------------------------------
  // Deletion and dangling references
  // ---------------------------------------------------------------------------

  /// Delete `id` and every descendant, with their bindings, locks, splits and
  /// files. Returns the deleted ids.
  #[instrument(name = "delete_instance", skip(self))]
  pub fn delete_instance(&self, id: InstanceId) -> Result<Vec<InstanceId>, InstanceError> {
    let ids: Vec<InstanceId> = {
      let mut state = self.state.write();
      let removed = state.graph.remove_subtree(id)?;
      removed
        .iter()
        .map(|record| {
          state.parameters.remove_instance(record.id);
          state.locks.release(record.id);
          state.splits.remove_instance(record.id);
          state.files.remove_instance(record.id);
          record.id
        })
        .collect()
    };

    info!(instance_id = id, deleted = ids.len(), "instances_deleted");
    self.notifier.notify(InstanceEvent::Deleted {
      instance_ids: ids.clone(),
    });
    Ok(ids)
  }

  /// Null out references to a removed compute resource. Returns how many
  /// instances were touched.
  pub fn remove_compute_resource(&self, resource_id: ComputeResourceId) -> usize {
    let mut state = self.state.write();
    let mut touched = 0;
    for record in state.graph.iter_mut() {
      if record.compute_resource == Some(resource_id) {
        record.compute_resource = None;
        touched += 1;
      }
    }
    debug!(resource_id, touched, "compute_resource_detached");
    touched
  }

  /// Null out references to a removed pipeline instance.
  pub fn remove_pipeline_instance(&self, pipeline_inst: PipelineInstanceId) -> usize {
    let mut state = self.state.write();
    let mut touched = 0;
    for record in state.graph.iter_mut() {
      if record.pipeline_inst == Some(pipeline_inst) {
        record.pipeline_inst = None;
        touched += 1;
      }
    }
    debug!(pipeline_inst, touched, "pipeline_instance_detached");
    touched
  }

  // ---------------------------------------------------------------------------
  // Snapshots
  // ---------------------------------------------------------------------------

  /// Copy out the full store contents.
  pub fn snapshot(&self) -> Snapshot {
    let state = self.state.read();
    let mut parameters: Vec<ParameterBinding> = state.parameters.iter().cloned().collect();
    parameters.sort_by_key(|b| (b.instance_id, b.parameter_id));

    Snapshot {
      feeds: state.feeds.values().cloned().collect(),
      instances: state.graph.iter().cloned().collect(),
      parameters,
      locks: state.locks.iter().collect(),
      splits: state.splits.iter().cloned().collect(),
      files: state.files.iter().cloned().collect(),
    }
  }

  /// Rebuild a store from a snapshot.
  ///
  /// Instances are inserted in id order, so parents must have smaller ids
  /// than their children (always true for ids handed out by a store).
  pub fn restore(
    catalog: Arc<dyn PluginCatalog>,
    settings: InstanceSettings,
    snapshot: Snapshot,
  ) -> Result<Self, InstanceError> {
    let mut state = State::default();

    for feed in snapshot.feeds {
      state.ids.feed = state.ids.feed.max(feed.id);
      state.feeds.insert(feed.id, feed);
    }

    let mut instances = snapshot.instances;
    instances.sort_by_key(|r| r.id);
    for record in instances {
      if !state.feeds.contains_key(&record.feed) {
        return Err(InstanceError::Integrity {
          id: record.id,
          message: format!("feed {} does not exist", record.feed),
        });
      }
      state.ids.instance = state.ids.instance.max(record.id);
      state.graph.insert(record)?;
    }

    for binding in snapshot.parameters {
      state.require(binding.instance_id)?;
      state.parameters.bind(binding)?;
    }
    for id in snapshot.locks {
      state.require(id)?;
      state.locks.acquire(id)?;
    }
    for split in snapshot.splits {
      state.ids.split = state.ids.split.max(split.id);
      state.splits.append(split);
    }
    for file in snapshot.files {
      state.ids.file = state.ids.file.max(file.id);
      state.files.insert(file)?;
    }

    info!(instances = state.graph.len(), feeds = state.feeds.len(), "store_restored");

    Ok(Self {
      state: RwLock::new(state),
      ..Self::new(catalog, settings)
    })
  }
}
