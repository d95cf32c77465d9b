//! Integration tests for SqliteStore against in-memory and on-disk databases.

use std::sync::Arc;

use chris_config::InstanceSettings;
use chrono::Duration;

use chris_instance::{
  InstanceError, InstanceStatus, InstanceStore, NewInstance, ParameterValue, Snapshot,
};
use chris_plugin::{
  ComputeResource, InMemoryCatalog, ParameterType, Plugin, PluginCatalog, PluginParameter,
  PluginType,
};
use chris_store::{CreatedInstance, Error, SqliteStore, Store};

async fn test_store() -> SqliteStore {
  let store = SqliteStore::in_memory().await.expect("failed to open database");
  store.migrate().await.expect("failed to migrate");
  seed(store).await
}

/// A file-backed store; unlike `in_memory` its pool has several connections.
async fn disk_store(dir: &tempfile::TempDir) -> SqliteStore {
  let store = SqliteStore::open(&dir.path().join("chris.db"))
    .await
    .expect("failed to open database");
  store.migrate().await.expect("failed to migrate");
  seed(store).await
}

async fn seed(store: SqliteStore) -> SqliteStore {
  store
    .insert_plugin(&Plugin::new(1, "dircopy", "2.1.1", PluginType::Fs))
    .await
    .unwrap();
  store
    .insert_plugin(&Plugin::new(2, "simpledsapp", "2.0.2", PluginType::Ds))
    .await
    .unwrap();
  store
    .insert_plugin_parameter(&PluginParameter {
      id: 1,
      plugin_id: 2,
      name: "sleepLength".to_string(),
      param_type: ParameterType::Integer,
      optional: true,
    })
    .await
    .unwrap();
  store
    .insert_plugin_parameter(&PluginParameter {
      id: 2,
      plugin_id: 2,
      name: "dir".to_string(),
      param_type: ParameterType::Unextpath,
      optional: false,
    })
    .await
    .unwrap();
  store
    .insert_compute_resource(&ComputeResource {
      id: 1,
      name: "host".to_string(),
    })
    .await
    .unwrap();

  store
}

/// Load the stored graph the way a fresh process would.
async fn reload(store: &SqliteStore) -> InstanceStore {
  let catalog = Arc::new(store.load_catalog().await.unwrap());
  let snapshot = store.load_snapshot().await.unwrap();
  InstanceStore::restore(catalog, InstanceSettings::default(), snapshot).unwrap()
}

/// Store a single root instance (id 1) and return the graph that created it.
async fn saved_root(store: &SqliteStore) -> InstanceStore {
  let catalog = Arc::new(store.load_catalog().await.unwrap());
  let graph = InstanceStore::new(catalog, InstanceSettings::default());
  let root = graph
    .create_instance(NewInstance::new(1, "alice"))
    .unwrap();
  store
    .insert_created(&CreatedInstance::from_graph(&graph, root).unwrap())
    .await
    .unwrap();
  graph
}

/// Build a small graph in memory: root 1 -> child 2, with a binding, a lock,
/// a split and a file.
async fn populated_graph(store: &SqliteStore) -> InstanceStore {
  let catalog: Arc<InMemoryCatalog> = Arc::new(store.load_catalog().await.unwrap());
  let graph = InstanceStore::new(catalog, InstanceSettings::default());

  let root = graph
    .create_instance(NewInstance::new(1, "alice").title("scan").compute_resource(1))
    .unwrap();
  let (_, children) = graph
    .split_instance(
      root.id,
      "status=waiting",
      vec![
        NewInstance::new(2, "alice")
          .parameter(1, ParameterValue::Integer(10))
          .parameter(2, ParameterValue::Unextpath("a/b,c/d".to_string())),
      ],
    )
    .unwrap();
  graph.acquire_lock(children[0].id).unwrap();
  graph
    .register_file(children[0].id, "alice/feed_1/dircopy_1/simpledsapp_2/data/out.txt")
    .unwrap();
  graph
}

#[tokio::test]
async fn test_load_catalog() {
  let store = test_store().await;
  let catalog = store.load_catalog().await.unwrap();

  assert_eq!(catalog.plugins().len(), 2);
  assert_eq!(catalog.parameters(2).len(), 2);
  assert_eq!(catalog.compute_resource(1).unwrap().name, "host");
  assert_eq!(
    catalog.plugin(1).unwrap(),
    Plugin::new(1, "dircopy", "2.1.1", PluginType::Fs)
  );
}

#[tokio::test]
async fn test_snapshot_round_trip() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  let snapshot = graph.snapshot();

  store.save_snapshot(&snapshot).await.unwrap();
  let loaded = store.load_snapshot().await.unwrap();

  assert_eq!(loaded, snapshot);
  assert_eq!(loaded.splits[0].created_plugin_inst_ids, vec![2]);

  // Saving again replaces rather than duplicates.
  store.save_snapshot(&loaded).await.unwrap();
  assert_eq!(store.load_snapshot().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_update_status_is_compare_and_set() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  store.save_snapshot(&graph.snapshot()).await.unwrap();

  store
    .update_status(1, InstanceStatus::Created, InstanceStatus::Waiting, None)
    .await
    .unwrap();
  let err = store
    .update_status(1, InstanceStatus::Created, InstanceStatus::Waiting, None)
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    Error::Conflict {
      id: 1,
      expected: InstanceStatus::Created,
      actual: InstanceStatus::Waiting,
    }
  ));
  assert_eq!(
    store.get_instance(1).await.unwrap().status,
    InstanceStatus::Waiting
  );

  let err = store
    .update_status(99, InstanceStatus::Created, InstanceStatus::Waiting, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_lock_uniqueness() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  store.save_snapshot(&graph.snapshot()).await.unwrap();

  // Instance 2 is locked in the snapshot.
  assert!(matches!(
    store.insert_lock(2).await.unwrap_err(),
    Error::AlreadyLocked(2)
  ));
  assert!(store.delete_lock(2).await.unwrap());
  assert!(!store.delete_lock(2).await.unwrap());
  store.insert_lock(2).await.unwrap();
}

#[tokio::test]
async fn test_delete_cascades() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  store.save_snapshot(&graph.snapshot()).await.unwrap();

  store.delete_instance(1).await.unwrap();
  let loaded = store.load_snapshot().await.unwrap();

  assert!(loaded.instances.is_empty());
  assert!(loaded.parameters.is_empty());
  assert!(loaded.locks.is_empty());
  assert!(loaded.splits.is_empty());
  assert!(loaded.files.is_empty());
  assert_eq!(loaded.feeds.len(), 1);
}

#[tokio::test]
async fn test_removing_compute_resource_nulls_reference() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  store.save_snapshot(&graph.snapshot()).await.unwrap();

  assert!(store.delete_compute_resource(1).await.unwrap());
  assert_eq!(store.get_instance(1).await.unwrap().compute_resource, None);
}

#[tokio::test]
async fn test_granular_inserts_match_snapshot() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  let snapshot = graph.snapshot();

  for feed in &snapshot.feeds {
    store.insert_feed(feed).await.unwrap();
  }
  for record in &snapshot.instances {
    store.insert_instance(record).await.unwrap();
  }
  for binding in &snapshot.parameters {
    store.insert_binding(binding).await.unwrap();
  }
  for id in &snapshot.locks {
    store.insert_lock(*id).await.unwrap();
  }
  for split in &snapshot.splits {
    store.insert_split(split).await.unwrap();
  }
  for file in &snapshot.files {
    store.insert_file(file).await.unwrap();
  }

  assert_eq!(store.load_snapshot().await.unwrap(), snapshot);
  assert_eq!(store.list_splits(1).await.unwrap(), snapshot.splits);
}

#[tokio::test]
async fn test_update_instance_persists_diagnostics() {
  let store = test_store().await;
  let graph = populated_graph(&store).await;
  store.save_snapshot(&graph.snapshot()).await.unwrap();

  let mut record = store.get_instance(2).await.unwrap();
  record.summary = "exit 1".to_string();
  record.error_code = "CODE09".to_string();
  store.update_instance(&record).await.unwrap();

  assert_eq!(store.get_instance(2).await.unwrap(), record);
}

#[tokio::test]
async fn test_on_disk_database_survives_reopen() {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let path = dir.path().join("chris.db");

  let snapshot: Snapshot = {
    let store = SqliteStore::open(&path).await.unwrap();
    store.migrate().await.unwrap();
    store
      .insert_plugin(&Plugin::new(1, "dircopy", "2.1.1", PluginType::Fs))
      .await
      .unwrap();
    let catalog = Arc::new(store.load_catalog().await.unwrap());
    let graph = InstanceStore::new(catalog, InstanceSettings::default());
    graph
      .create_instance(NewInstance::new(1, "alice"))
      .unwrap();
    let snapshot = graph.snapshot();
    store.save_snapshot(&snapshot).await.unwrap();
    snapshot
  };

  let reopened = SqliteStore::open(&path).await.unwrap();
  reopened.migrate().await.unwrap();
  assert_eq!(reopened.load_snapshot().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_cancel_accepts_status_changed_by_another_writer() {
  let store = test_store().await;
  saved_root(&store).await;
  let graph = reload(&store).await;

  // Another process moves the instance on after this one loaded it.
  store
    .update_status(1, InstanceStatus::Created, InstanceStatus::Waiting, None)
    .await
    .unwrap();

  let record = graph.cancel(1).unwrap();
  store.cancel(1, Some(record.end_date)).await.unwrap();

  let stored = store.get_instance(1).await.unwrap();
  assert_eq!(stored.status, InstanceStatus::Cancelled);
  assert_eq!(stored.end_date, record.end_date);
}

#[tokio::test]
async fn test_cancel_refuses_terminal_and_missing_instances() {
  let store = test_store().await;
  saved_root(&store).await;
  store.cancel(1, None).await.unwrap();

  assert!(matches!(
    store.cancel(1, None).await.unwrap_err(),
    Error::Instance(InstanceError::InvalidTransition {
      id: 1,
      from: InstanceStatus::Cancelled,
      to: InstanceStatus::Cancelled,
    })
  ));
  assert!(matches!(
    store.cancel(99, None).await.unwrap_err(),
    Error::NotFound(_)
  ));
}

#[tokio::test]
async fn test_cancel_wins_against_concurrent_status_update() {
  let dir = tempfile::tempdir().unwrap();
  let store = disk_store(&dir).await;
  saved_root(&store).await;

  let (update, cancel) = tokio::join!(
    store.update_status(1, InstanceStatus::Created, InstanceStatus::Waiting, None),
    store.cancel(1, None),
  );

  cancel.unwrap();
  if let Err(err) = update {
    assert!(matches!(
      err,
      Error::Conflict {
        actual: InstanceStatus::Cancelled,
        ..
      }
    ));
  }
  assert_eq!(
    store.get_instance(1).await.unwrap().status,
    InstanceStatus::Cancelled
  );
}

#[tokio::test]
async fn test_update_instance_keeps_terminal_end_date() {
  let store = test_store().await;
  saved_root(&store).await;
  let stale = store.get_instance(1).await.unwrap();

  let stamped = stale.end_date + Duration::hours(1);
  store.cancel(1, Some(stamped)).await.unwrap();

  let mut update = stale.clone();
  update.summary = "cancelled by user".to_string();
  store.update_instance(&update).await.unwrap();

  let stored = store.get_instance(1).await.unwrap();
  assert_eq!(stored.status, InstanceStatus::Cancelled);
  assert_eq!(stored.end_date, stamped);
  assert_eq!(stored.summary, "cancelled by user");
}

#[tokio::test]
async fn test_root_with_taken_id_leaves_no_feed() {
  let store = test_store().await;
  saved_root(&store).await;
  let ours = reload(&store).await;
  let theirs = reload(&store).await;

  // Both processes hand out instance id 2; only ours starts a new feed.
  let child = theirs
    .create_instance(NewInstance::new(2, "bob").previous(1))
    .unwrap();
  store
    .insert_created(&CreatedInstance::from_graph(&theirs, child).unwrap())
    .await
    .unwrap();

  let root = ours.create_instance(NewInstance::new(1, "alice")).unwrap();
  let created = CreatedInstance::from_graph(&ours, root).unwrap();
  assert_eq!(created.record.id, 2);
  assert!(created.feed.is_some());
  assert!(store.insert_created(&created).await.is_err());

  let loaded = store.load_snapshot().await.unwrap();
  assert_eq!(loaded.feeds.len(), 1);
  assert_eq!(loaded.instances.len(), 2);
  assert_eq!(store.get_instance(2).await.unwrap().owner, "bob");
}

#[tokio::test]
async fn test_split_with_taken_id_writes_nothing() {
  let store = test_store().await;
  saved_root(&store).await;
  let ours = reload(&store).await;
  let theirs = reload(&store).await;

  // Another process stores instance 3 after we loaded the graph.
  theirs
    .create_instance(NewInstance::new(2, "bob").previous(1))
    .unwrap();
  let taken = theirs
    .create_instance(NewInstance::new(2, "bob").previous(1))
    .unwrap();
  assert_eq!(taken.id, 3);
  store
    .insert_created(&CreatedInstance::from_graph(&theirs, taken).unwrap())
    .await
    .unwrap();

  let (split, children) = ours
    .split_instance(
      1,
      "status=waiting",
      vec![
        NewInstance::new(2, "alice").parameter(1, ParameterValue::Integer(3)),
        NewInstance::new(2, "alice"),
      ],
    )
    .unwrap();
  assert_eq!(split.created_plugin_inst_ids, vec![2, 3]);
  let rows = children
    .into_iter()
    .map(|record| CreatedInstance::from_graph(&ours, record).unwrap())
    .collect::<Vec<_>>();

  assert!(store.insert_split_with_children(&split, &rows).await.is_err());

  let loaded = store.load_snapshot().await.unwrap();
  let ids: Vec<_> = loaded.instances.iter().map(|r| r.id).collect();
  assert_eq!(ids, vec![1, 3]);
  assert!(loaded.parameters.is_empty());
  assert!(loaded.splits.is_empty());
}

#[tokio::test]
async fn test_concurrent_split_writers_persist_once() {
  let dir = tempfile::tempdir().unwrap();
  let store = disk_store(&dir).await;
  saved_root(&store).await;

  let mut writes = Vec::new();
  for owner in ["alice", "bob"] {
    let graph = reload(&store).await;
    let (split, children) = graph
      .split_instance(
        1,
        owner,
        vec![NewInstance::new(2, owner), NewInstance::new(2, owner)],
      )
      .unwrap();
    let rows = children
      .into_iter()
      .map(|record| CreatedInstance::from_graph(&graph, record).unwrap())
      .collect::<Vec<_>>();
    writes.push((split, rows));
  }

  let (first, second) = tokio::join!(
    store.insert_split_with_children(&writes[0].0, &writes[0].1),
    store.insert_split_with_children(&writes[1].0, &writes[1].1),
  );
  assert_eq!(first.is_ok() as usize + second.is_ok() as usize, 1);

  let loaded = store.load_snapshot().await.unwrap();
  assert_eq!(loaded.splits.len(), 1);
  assert_eq!(loaded.instances.len(), 3);
  let winner = &loaded.splits[0].filter;
  assert!(
    loaded
      .instances
      .iter()
      .filter(|r| r.id != 1)
      .all(|r| &r.owner == winner)
  );
}

#[tokio::test]
async fn test_persisted_split_survives_reload() {
  let store = test_store().await;
  saved_root(&store).await;
  let graph = reload(&store).await;

  let (split, children) = graph
    .split_instance(
      1,
      "a,b",
      vec![NewInstance::new(2, "alice").parameter(1, ParameterValue::Integer(7))],
    )
    .unwrap();
  let rows = children
    .into_iter()
    .map(|record| CreatedInstance::from_graph(&graph, record).unwrap())
    .collect::<Vec<_>>();
  store.insert_split_with_children(&split, &rows).await.unwrap();

  assert_eq!(store.load_snapshot().await.unwrap(), graph.snapshot());
  assert_eq!(store.list_splits(1).await.unwrap(), vec![split]);
}
