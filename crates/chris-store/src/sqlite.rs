use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, instrument};

use chris_instance::{
  Feed, InstanceError, InstanceFile, InstanceId, InstanceRecord, InstanceStatus,
  ParameterBinding, Snapshot, SplitRecord,
};
use chris_plugin::{ComputeResource, InMemoryCatalog, Plugin, PluginParameter};

use crate::types::{
  BindingRow, ComputeResourceRow, FeedOwnerRow, FeedRow, FileRow, InstanceRow,
  PluginParameterRow, PluginRow, SplitRow, ValueColumns, signed, unsigned,
};
use crate::{CreatedInstance, Error, Store};

const INSTANCE_COLUMNS: &str = r#"
  i.id, i.title, i.status, i.start_date, i.end_date, i.summary, i.raw, i.error_code,
  i.previous_id, i.plugin_id, p.name AS plugin_name, p.version AS plugin_version,
  p.plugin_type, i.feed_id, i.owner, i.compute_resource_id, i.pipeline_inst_id,
  i.cpu_limit, i.memory_limit, i.number_of_workers, i.gpu_limit
"#;

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn catalog_error(err: chris_plugin::PluginError) -> Error {
  Error::Corrupt {
    table: "plugins",
    message: err.to_string(),
  }
}

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database file at `path`.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    debug!(path = %path.display(), "database_opened");
    Ok(Self::new(pool))
  }

  /// A private in-memory database. Every connection to `sqlite::memory:` is
  /// its own database, so the pool holds exactly one.
  pub async fn in_memory() -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  async fn current_status(&self, id: InstanceId) -> Result<Option<InstanceStatus>, Error> {
    let status: Option<String> =
      sqlx::query_scalar("SELECT status FROM plugin_instances WHERE id = ?")
        .bind(signed(id)?)
        .fetch_optional(&self.pool)
        .await?;

    status
      .map(|s| {
        s.parse::<InstanceStatus>().map_err(|e| Error::Corrupt {
          table: "plugin_instances",
          message: e.to_string(),
        })
      })
      .transpose()
  }
}

async fn insert_feed(tx: &mut Transaction<'_, Sqlite>, feed: &Feed) -> Result<(), Error> {
  sqlx::query("INSERT INTO feeds (id, name, creation_date) VALUES (?, ?, ?)")
    .bind(signed(feed.id)?)
    .bind(&feed.name)
    .bind(feed.creation_date)
    .execute(&mut **tx)
    .await?;

  for owner in &feed.owners {
    sqlx::query("INSERT INTO feed_owners (feed_id, username) VALUES (?, ?)")
      .bind(signed(feed.id)?)
      .bind(owner)
      .execute(&mut **tx)
      .await?;
  }

  Ok(())
}

async fn insert_instance(
  tx: &mut Transaction<'_, Sqlite>,
  record: &InstanceRecord,
) -> Result<(), Error> {
  sqlx::query(
    r#"
    INSERT INTO plugin_instances (
      id, title, status, start_date, end_date, summary, raw, error_code,
      previous_id, plugin_id, feed_id, owner, compute_resource_id, pipeline_inst_id,
      cpu_limit, memory_limit, number_of_workers, gpu_limit
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
  )
  .bind(signed(record.id)?)
  .bind(&record.title)
  .bind(record.status.as_str())
  .bind(record.start_date)
  .bind(record.end_date)
  .bind(&record.summary)
  .bind(&record.raw)
  .bind(&record.error_code)
  .bind(record.previous.map(signed).transpose()?)
  .bind(signed(record.plugin.id)?)
  .bind(signed(record.feed)?)
  .bind(&record.owner)
  .bind(record.compute_resource.map(signed).transpose()?)
  .bind(record.pipeline_inst.map(signed).transpose()?)
  .bind(i64::from(record.limits.cpu_limit.0))
  .bind(i64::from(record.limits.memory_limit.0))
  .bind(i64::from(record.limits.number_of_workers))
  .bind(i64::from(record.limits.gpu_limit))
  .execute(&mut **tx)
  .await?;

  Ok(())
}

async fn insert_binding(
  tx: &mut Transaction<'_, Sqlite>,
  binding: &ParameterBinding,
) -> Result<(), Error> {
  let columns = ValueColumns::from(&binding.value);
  sqlx::query(
    r#"
    INSERT INTO parameters (
      plugin_inst_id, plugin_param_id, kind,
      string_value, integer_value, float_value, boolean_value, path_value
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#,
  )
  .bind(signed(binding.instance_id)?)
  .bind(signed(binding.parameter_id)?)
  .bind(binding.value.kind().as_str())
  .bind(columns.string_value)
  .bind(columns.integer_value)
  .bind(columns.float_value)
  .bind(columns.boolean_value)
  .bind(columns.path_value)
  .execute(&mut **tx)
  .await?;

  Ok(())
}

async fn insert_created(
  tx: &mut Transaction<'_, Sqlite>,
  created: &CreatedInstance,
) -> Result<(), Error> {
  if let Some(feed) = &created.feed {
    insert_feed(tx, feed).await?;
  }
  insert_instance(tx, &created.record).await?;
  for binding in &created.bindings {
    insert_binding(tx, binding).await?;
  }
  Ok(())
}

async fn insert_lock(tx: &mut Transaction<'_, Sqlite>, id: InstanceId) -> Result<(), Error> {
  sqlx::query("INSERT INTO plugin_instance_locks (plugin_inst_id) VALUES (?)")
    .bind(signed(id)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
      if is_unique_violation(&e) {
        Error::AlreadyLocked(id)
      } else {
        Error::Database(e)
      }
    })?;

  Ok(())
}

async fn insert_split(tx: &mut Transaction<'_, Sqlite>, split: &SplitRecord) -> Result<(), Error> {
  sqlx::query(
    r#"
    INSERT INTO plugin_instance_splits (id, plugin_inst_id, creation_date, filter, created_plugin_inst_ids)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(signed(split.id)?)
  .bind(signed(split.plugin_inst)?)
  .bind(split.creation_date)
  .bind(&split.filter)
  .bind(split.created_ids_string())
  .execute(&mut **tx)
  .await?;

  Ok(())
}

async fn insert_file(tx: &mut Transaction<'_, Sqlite>, file: &InstanceFile) -> Result<(), Error> {
  sqlx::query(
    r#"
    INSERT INTO plugin_instance_files (id, creation_date, fname, plugin_inst_id, feed_id)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(signed(file.id)?)
  .bind(file.creation_date)
  .bind(&file.fname)
  .bind(signed(file.plugin_inst)?)
  .bind(signed(file.feed)?)
  .execute(&mut **tx)
  .await?;

  Ok(())
}

#[async_trait]
impl Store for SqliteStore {
  async fn insert_plugin(&self, plugin: &Plugin) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO plugins (
        id, name, version, plugin_type,
        min_cpu_limit, min_memory_limit, min_number_of_workers, min_gpu_limit
      )
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(signed(plugin.id)?)
    .bind(&plugin.name)
    .bind(&plugin.version)
    .bind(plugin.plugin_type.as_str())
    .bind(i64::from(plugin.min_cpu_limit.0))
    .bind(i64::from(plugin.min_memory_limit.0))
    .bind(i64::from(plugin.min_number_of_workers))
    .bind(i64::from(plugin.min_gpu_limit))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn insert_plugin_parameter(&self, parameter: &PluginParameter) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO plugin_parameters (id, plugin_id, name, param_type, optional)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(signed(parameter.id)?)
    .bind(signed(parameter.plugin_id)?)
    .bind(&parameter.name)
    .bind(parameter.param_type.as_str())
    .bind(parameter.optional)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn insert_compute_resource(&self, resource: &ComputeResource) -> Result<(), Error> {
    sqlx::query("INSERT INTO compute_resources (id, name) VALUES (?, ?)")
      .bind(signed(resource.id)?)
      .bind(&resource.name)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn delete_compute_resource(&self, id: u64) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM compute_resources WHERE id = ?")
      .bind(signed(id)?)
      .execute(&self.pool)
      .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn load_catalog(&self) -> Result<InMemoryCatalog, Error> {
    let catalog = InMemoryCatalog::new();

    let plugins: Vec<PluginRow> = sqlx::query_as(
      r#"
      SELECT id, name, version, plugin_type,
             min_cpu_limit, min_memory_limit, min_number_of_workers, min_gpu_limit
      FROM plugins
      ORDER BY id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    for row in plugins {
      catalog
        .add_plugin(Plugin::try_from(row)?)
        .map_err(catalog_error)?;
    }

    let parameters: Vec<PluginParameterRow> = sqlx::query_as(
      "SELECT id, plugin_id, name, param_type, optional FROM plugin_parameters ORDER BY id",
    )
    .fetch_all(&self.pool)
    .await?;
    for row in parameters {
      catalog
        .add_parameter(PluginParameter::try_from(row)?)
        .map_err(catalog_error)?;
    }

    let resources: Vec<ComputeResourceRow> =
      sqlx::query_as("SELECT id, name FROM compute_resources ORDER BY id")
        .fetch_all(&self.pool)
        .await?;
    for row in resources {
      catalog
        .add_compute_resource(ComputeResource::try_from(row)?)
        .map_err(catalog_error)?;
    }

    Ok(catalog)
  }

  async fn insert_feed(&self, feed: &Feed) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_feed(&mut tx, feed).await?;
    tx.commit().await?;
    Ok(())
  }

  async fn insert_instance(&self, record: &InstanceRecord) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_instance(&mut tx, record).await?;
    tx.commit().await?;
    Ok(())
  }

  #[instrument(
    name = "store_insert_created",
    skip(self, created),
    fields(instance_id = created.record.id)
  )]
  async fn insert_created(&self, created: &CreatedInstance) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_created(&mut tx, created).await?;
    tx.commit().await?;
    debug!(bindings = created.bindings.len(), "instance_persisted");
    Ok(())
  }

  async fn get_instance(&self, id: InstanceId) -> Result<InstanceRecord, Error> {
    let row: Option<InstanceRow> = sqlx::query_as(&format!(
      "SELECT {} FROM plugin_instances i JOIN plugins p ON p.id = i.plugin_id WHERE i.id = ?",
      INSTANCE_COLUMNS
    ))
    .bind(signed(id)?)
    .fetch_optional(&self.pool)
    .await?;

    row
      .ok_or_else(|| Error::NotFound(format!("plugin instance {}", id)))?
      .try_into()
  }

  async fn update_instance(&self, record: &InstanceRecord) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE plugin_instances
      SET title = ?, summary = ?, raw = ?, error_code = ?,
          compute_resource_id = ?, pipeline_inst_id = ?,
          cpu_limit = ?, memory_limit = ?, number_of_workers = ?, gpu_limit = ?
      WHERE id = ?
      "#,
    )
    .bind(&record.title)
    .bind(&record.summary)
    .bind(&record.raw)
    .bind(&record.error_code)
    .bind(record.compute_resource.map(signed).transpose()?)
    .bind(record.pipeline_inst.map(signed).transpose()?)
    .bind(i64::from(record.limits.cpu_limit.0))
    .bind(i64::from(record.limits.memory_limit.0))
    .bind(i64::from(record.limits.number_of_workers))
    .bind(i64::from(record.limits.gpu_limit))
    .bind(signed(record.id)?)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("plugin instance {}", record.id)));
    }
    Ok(())
  }

  #[instrument(
    name = "store_update_status",
    skip(self, expected, new, end_date),
    fields(expected = %expected, new = %new)
  )]
  async fn update_status(
    &self,
    id: InstanceId,
    expected: InstanceStatus,
    new: InstanceStatus,
    end_date: Option<DateTime<Utc>>,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE plugin_instances
      SET status = ?, end_date = COALESCE(?, end_date)
      WHERE id = ? AND status = ?
      "#,
    )
    .bind(new.as_str())
    .bind(end_date)
    .bind(signed(id)?)
    .bind(expected.as_str())
    .execute(&self.pool)
    .await?;

    if result.rows_affected() > 0 {
      debug!(instance_id = id, "status_persisted");
      return Ok(());
    }

    match self.current_status(id).await? {
      Some(actual) => Err(Error::Conflict {
        id,
        expected,
        actual,
      }),
      None => Err(Error::NotFound(format!("plugin instance {}", id))),
    }
  }

  #[instrument(name = "store_cancel", skip(self, end_date))]
  async fn cancel(&self, id: InstanceId, end_date: Option<DateTime<Utc>>) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE plugin_instances
      SET status = ?, end_date = COALESCE(?, end_date)
      WHERE id = ? AND status NOT IN (?, ?, ?)
      "#,
    )
    .bind(InstanceStatus::Cancelled.as_str())
    .bind(end_date)
    .bind(signed(id)?)
    .bind(InstanceStatus::FinishedSuccessfully.as_str())
    .bind(InstanceStatus::FinishedWithError.as_str())
    .bind(InstanceStatus::Cancelled.as_str())
    .execute(&self.pool)
    .await?;

    if result.rows_affected() > 0 {
      debug!(instance_id = id, "cancel_persisted");
      return Ok(());
    }

    match self.current_status(id).await? {
      Some(actual) => Err(Error::Instance(InstanceError::InvalidTransition {
        id,
        from: actual,
        to: InstanceStatus::Cancelled,
      })),
      None => Err(Error::NotFound(format!("plugin instance {}", id))),
    }
  }

  async fn delete_instance(&self, id: InstanceId) -> Result<(), Error> {
    let result = sqlx::query("DELETE FROM plugin_instances WHERE id = ?")
      .bind(signed(id)?)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("plugin instance {}", id)));
    }
    Ok(())
  }

  async fn insert_binding(&self, binding: &ParameterBinding) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_binding(&mut tx, binding).await?;
    tx.commit().await?;
    Ok(())
  }

  async fn insert_lock(&self, id: InstanceId) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_lock(&mut tx, id).await?;
    tx.commit().await?;
    Ok(())
  }

  async fn delete_lock(&self, id: InstanceId) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM plugin_instance_locks WHERE plugin_inst_id = ?")
      .bind(signed(id)?)
      .execute(&self.pool)
      .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn insert_split(&self, split: &SplitRecord) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_split(&mut tx, split).await?;
    tx.commit().await?;
    Ok(())
  }

  #[instrument(
    name = "store_insert_split",
    skip(self, split, children),
    fields(parent = split.plugin_inst, children = children.len())
  )]
  async fn insert_split_with_children(
    &self,
    split: &SplitRecord,
    children: &[CreatedInstance],
  ) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    for child in children {
      insert_created(&mut tx, child).await?;
    }
    insert_split(&mut tx, split).await?;
    tx.commit().await?;
    info!(split_id = split.id, "split_persisted");
    Ok(())
  }

  async fn list_splits(&self, id: InstanceId) -> Result<Vec<SplitRecord>, Error> {
    let rows: Vec<SplitRow> = sqlx::query_as(
      r#"
      SELECT id, plugin_inst_id, creation_date, filter, created_plugin_inst_ids
      FROM plugin_instance_splits
      WHERE plugin_inst_id = ?
      ORDER BY creation_date DESC, id DESC
      "#,
    )
    .bind(signed(id)?)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(SplitRecord::try_from).collect()
  }

  async fn insert_file(&self, file: &InstanceFile) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    insert_file(&mut tx, file).await?;
    tx.commit().await?;
    Ok(())
  }

  async fn load_snapshot(&self) -> Result<Snapshot, Error> {
    let owner_rows: Vec<FeedOwnerRow> =
      sqlx::query_as("SELECT feed_id, username FROM feed_owners")
        .fetch_all(&self.pool)
        .await?;
    let mut owners: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for row in owner_rows {
      owners.entry(row.feed_id).or_default().insert(row.username);
    }

    let feed_rows: Vec<FeedRow> =
      sqlx::query_as("SELECT id, name, creation_date FROM feeds ORDER BY id")
        .fetch_all(&self.pool)
        .await?;
    let feeds = feed_rows
      .into_iter()
      .map(|row| {
        let feed_owners = owners.remove(&row.id).unwrap_or_default();
        row.into_feed(feed_owners)
      })
      .collect::<Result<Vec<_>, _>>()?;

    let instance_rows: Vec<InstanceRow> = sqlx::query_as(&format!(
      "SELECT {} FROM plugin_instances i JOIN plugins p ON p.id = i.plugin_id ORDER BY i.id",
      INSTANCE_COLUMNS
    ))
    .fetch_all(&self.pool)
    .await?;
    let instances = instance_rows
      .into_iter()
      .map(InstanceRecord::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    let binding_rows: Vec<BindingRow> = sqlx::query_as(
      r#"
      SELECT b.plugin_inst_id, b.plugin_param_id, pp.name, b.kind,
             b.string_value, b.integer_value, b.float_value, b.boolean_value, b.path_value
      FROM parameters b
      JOIN plugin_parameters pp ON pp.id = b.plugin_param_id
      ORDER BY b.plugin_inst_id, b.plugin_param_id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    let parameters = binding_rows
      .into_iter()
      .map(ParameterBinding::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    let locks: Vec<i64> =
      sqlx::query_scalar("SELECT plugin_inst_id FROM plugin_instance_locks ORDER BY plugin_inst_id")
        .fetch_all(&self.pool)
        .await?;
    let locks = locks
      .into_iter()
      .map(|id| unsigned("plugin_instance_locks", "plugin_inst_id", id))
      .collect::<Result<Vec<_>, _>>()?;

    let split_rows: Vec<SplitRow> = sqlx::query_as(
      r#"
      SELECT id, plugin_inst_id, creation_date, filter, created_plugin_inst_ids
      FROM plugin_instance_splits
      ORDER BY id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    let splits = split_rows
      .into_iter()
      .map(SplitRecord::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    let file_rows: Vec<FileRow> = sqlx::query_as(
      "SELECT id, creation_date, fname, plugin_inst_id, feed_id FROM plugin_instance_files ORDER BY id",
    )
    .fetch_all(&self.pool)
    .await?;
    let files = file_rows
      .into_iter()
      .map(InstanceFile::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Snapshot {
      feeds,
      instances,
      parameters,
      locks,
      splits,
      files,
    })
  }

  #[instrument(
    name = "save_snapshot",
    skip(self, snapshot),
    fields(instances = snapshot.instances.len())
  )]
  async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    // Children first, so the self-referencing cascade has nothing left to do.
    for table in [
      "plugin_instance_files",
      "plugin_instance_splits",
      "plugin_instance_locks",
      "parameters",
    ] {
      sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("DELETE FROM plugin_instances")
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM feeds").execute(&mut *tx).await?;

    for feed in &snapshot.feeds {
      insert_feed(&mut tx, feed).await?;
    }
    let mut instances: Vec<&InstanceRecord> = snapshot.instances.iter().collect();
    instances.sort_by_key(|r| r.id);
    for record in instances {
      insert_instance(&mut tx, record).await?;
    }
    for binding in &snapshot.parameters {
      insert_binding(&mut tx, binding).await?;
    }
    for id in &snapshot.locks {
      insert_lock(&mut tx, *id).await?;
    }
    for split in &snapshot.splits {
      insert_split(&mut tx, split).await?;
    }
    for file in &snapshot.files {
      insert_file(&mut tx, file).await?;
    }

    tx.commit().await?;
    info!(
      feeds = snapshot.feeds.len(),
      instances = snapshot.instances.len(),
      "snapshot_saved"
    );
    Ok(())
  }
}
