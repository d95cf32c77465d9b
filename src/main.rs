use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chris_config::Settings;
use chris_instance::{
  FileFilter, InstanceFilter, InstanceId, InstanceStatus, InstanceStore,
  InstanceUpdate, NewInstance, ParameterValue, ResourceLimits,
};
use chris_plugin::{
  ComputeResource, CpuQuantity, InMemoryCatalog, MemoryQuantity, ParameterType, Plugin,
  PluginCatalog, PluginParameter,
};
use chris_store::{CreatedInstance, SqliteStore, Store};

/// ChRIS - plugin instance graph over a SQLite database
#[derive(Parser)]
#[command(name = "chris")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.chris)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to a JSON settings file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Manage registered plugins
  Plugin {
    #[command(subcommand)]
    action: PluginCommand,
  },

  /// Manage compute resources
  Resource {
    #[command(subcommand)]
    action: ResourceCommand,
  },

  /// Create a plugin instance
  Create {
    /// Plugin ID
    plugin: u64,

    #[arg(long)]
    owner: String,

    /// Parent instance (required for ds/ts plugins)
    #[arg(long)]
    previous: Option<InstanceId>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    compute_resource: Option<u64>,

    #[arg(long)]
    pipeline_inst: Option<u64>,

    /// CPU limit, e.g. "2000m"
    #[arg(long)]
    cpu: Option<CpuQuantity>,

    /// Memory limit, e.g. "1Gi"
    #[arg(long)]
    memory: Option<MemoryQuantity>,

    #[arg(long)]
    workers: Option<u32>,

    #[arg(long)]
    gpus: Option<u32>,

    /// Parameter binding as PARAMETER_ID=VALUE (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(u64, String)>,
  },

  /// Show an instance
  Show { id: InstanceId },

  /// Update title, summary or error code of an instance
  Update {
    id: InstanceId,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    summary: Option<String>,

    #[arg(long)]
    error_code: Option<String>,
  },

  /// Move an instance from EXPECTED to NEW status
  Status {
    id: InstanceId,
    expected: InstanceStatus,
    new: InstanceStatus,
  },

  /// Cancel an instance
  Cancel { id: InstanceId },

  /// Delete an instance and its descendants
  Delete { id: InstanceId },

  /// Print the root of an instance's tree
  Root { id: InstanceId },

  /// Print an instance and all of its descendants
  Descendants { id: InstanceId },

  /// Print the output path of an instance
  Path { id: InstanceId },

  /// Take the lock on an instance
  Lock { id: InstanceId },

  /// Release the lock on an instance
  Unlock { id: InstanceId },

  /// Fan an instance out into child instances
  Split {
    parent: InstanceId,

    #[arg(long)]
    owner: String,

    #[arg(long, default_value = "")]
    filter: String,

    /// Plugin ID of a child (repeatable)
    #[arg(long = "plugin", required = true)]
    plugins: Vec<u64>,
  },

  /// Print the split history of an instance
  Splits { id: InstanceId },

  /// Print the parameter bindings of an instance
  Params { id: InstanceId },

  /// Register an output file
  AddFile { id: InstanceId, fname: String },

  /// List the output files of an instance
  Files { id: InstanceId },

  /// Query instances
  Query {
    /// Full filter as JSON; flags below override its fields
    #[arg(long)]
    json: Option<String>,

    #[arg(long)]
    status: Option<InstanceStatus>,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    root: Option<InstanceId>,

    #[arg(long)]
    feed: Option<u64>,

    #[arg(long)]
    plugin_name: Option<String>,

    #[arg(long)]
    title: Option<String>,
  },
}

#[derive(Subcommand)]
enum PluginCommand {
  /// Register a plugin from a JSON manifest
  Add { manifest: PathBuf },

  /// List registered plugins
  List,
}

#[derive(Subcommand)]
enum ResourceCommand {
  /// Register a compute resource
  Add { id: u64, name: String },

  /// Remove a compute resource
  Remove { id: u64 },
}

/// A plugin descriptor together with its parameters.
#[derive(Debug, Serialize, Deserialize)]
struct PluginManifest {
  #[serde(flatten)]
  plugin: Plugin,

  #[serde(default)]
  parameters: Vec<PluginParameter>,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
  init_tracing(&settings.log.filter);

  let data_dir = match cli.data_dir.or_else(|| settings.data_dir.clone()) {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".chris"),
  };

  match cli.command {
    Some(command) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run(command, &data_dir, &settings).await })
    }
    None => {
      println!("chris - use --help to see available commands");
      Ok(())
    }
  }
}

fn init_tracing(default_filter: &str) {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn parse_param(s: &str) -> Result<(u64, String), String> {
  let (id, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected PARAMETER_ID=VALUE, got '{}'", s))?;
  let id = id
    .trim()
    .parse::<u64>()
    .map_err(|e| format!("invalid parameter id '{}': {}", id, e))?;
  Ok((id, value.to_string()))
}

/// Interpret a raw command-line value according to the parameter's type.
fn typed_value(catalog: &dyn PluginCatalog, id: u64, raw: &str) -> Result<ParameterValue> {
  let parameter = catalog
    .parameter(id)
    .with_context(|| format!("plugin parameter {} not found", id))?;
  let invalid = || format!("invalid {} value for '{}': {}", parameter.param_type, parameter.name, raw);

  let value = match parameter.param_type {
    ParameterType::String => ParameterValue::String(raw.to_string()),
    ParameterType::Integer => ParameterValue::Integer(raw.parse().with_context(invalid)?),
    ParameterType::Float => ParameterValue::Float(raw.parse().with_context(invalid)?),
    ParameterType::Boolean => ParameterValue::Boolean(raw.parse().with_context(invalid)?),
    ParameterType::Path => ParameterValue::Path(raw.to_string()),
    ParameterType::Unextpath => ParameterValue::Unextpath(raw.to_string()),
  };
  Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn open_database(data_dir: &Path, settings: &Settings) -> Result<SqliteStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = settings.database_path(data_dir);
  let db = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open database: {}", path.display()))?;
  db.migrate().await.context("failed to migrate database")?;
  Ok(db)
}

/// Rebuild the in-memory instance graph from the database.
async fn load_graph(
  db: &SqliteStore,
  settings: &Settings,
) -> Result<(Arc<InMemoryCatalog>, InstanceStore)> {
  let catalog = Arc::new(db.load_catalog().await.context("failed to load catalog")?);
  let snapshot = db
    .load_snapshot()
    .await
    .context("failed to load instances")?;
  let graph = InstanceStore::restore(catalog.clone(), settings.instances.clone(), snapshot)
    .context("stored instance graph is inconsistent")?;
  Ok((catalog, graph))
}

async fn run(command: Commands, data_dir: &Path, settings: &Settings) -> Result<()> {
  let db = open_database(data_dir, settings).await?;

  match command {
    Commands::Plugin { action } => match action {
      PluginCommand::Add { manifest } => {
        let content = tokio::fs::read_to_string(&manifest)
          .await
          .with_context(|| format!("failed to read manifest: {}", manifest.display()))?;
        let manifest: PluginManifest = serde_json::from_str(&content)
          .with_context(|| format!("failed to parse manifest: {}", manifest.display()))?;

        for parameter in &manifest.parameters {
          if parameter.plugin_id != manifest.plugin.id {
            bail!(
              "parameter '{}' belongs to plugin {}, not {}",
              parameter.name,
              parameter.plugin_id,
              manifest.plugin.id
            );
          }
        }

        db.insert_plugin(&manifest.plugin)
          .await
          .context("failed to register plugin")?;
        for parameter in &manifest.parameters {
          db.insert_plugin_parameter(parameter)
            .await
            .with_context(|| format!("failed to register parameter '{}'", parameter.name))?;
        }
        info!(plugin_id = manifest.plugin.id, name = %manifest.plugin.name, "plugin_registered");
        print_json(&manifest)
      }
      PluginCommand::List => {
        let catalog = db.load_catalog().await?;
        let manifests: Vec<PluginManifest> = catalog
          .plugins()
          .into_iter()
          .map(|plugin| PluginManifest {
            parameters: catalog.parameters(plugin.id),
            plugin,
          })
          .collect();
        print_json(&manifests)
      }
    },

    Commands::Resource { action } => match action {
      ResourceCommand::Add { id, name } => {
        let resource = ComputeResource { id, name };
        db.insert_compute_resource(&resource)
          .await
          .context("failed to register compute resource")?;
        print_json(&resource)
      }
      ResourceCommand::Remove { id } => {
        let (_, graph) = load_graph(&db, settings).await?;
        if !db.delete_compute_resource(id).await? {
          bail!("compute resource {} not found", id);
        }
        let detached = graph.remove_compute_resource(id);
        print_json(&serde_json::json!({ "removed": id, "detached_instances": detached }))
      }
    },

    Commands::Create {
      plugin,
      owner,
      previous,
      title,
      compute_resource,
      pipeline_inst,
      cpu,
      memory,
      workers,
      gpus,
      params,
    } => {
      let (catalog, graph) = load_graph(&db, settings).await?;

      let mut request = NewInstance::new(plugin, owner).limits(ResourceLimits {
        cpu_limit: cpu,
        memory_limit: memory,
        number_of_workers: workers,
        gpu_limit: gpus,
      });
      request.previous = previous;
      request.title = title;
      request.compute_resource = compute_resource;
      request.pipeline_inst = pipeline_inst;
      for (id, raw) in &params {
        request = request.parameter(*id, typed_value(catalog.as_ref(), *id, raw)?);
      }

      let record = graph.create_instance(request)?;
      db.insert_created(&CreatedInstance::from_graph(&graph, record.clone())?)
        .await?;
      print_json(&record)
    }

    Commands::Show { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      print_json(&graph.get(id)?)
    }

    Commands::Update {
      id,
      title,
      summary,
      error_code,
    } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let record = graph.update_instance(
        id,
        InstanceUpdate {
          title,
          summary,
          error_code,
          ..Default::default()
        },
      )?;
      db.update_instance(&record).await?;
      print_json(&record)
    }

    Commands::Status { id, expected, new } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let record = graph.transition_status(id, expected, new)?;
      if new == InstanceStatus::Cancelled {
        db.cancel(id, Some(record.end_date)).await?;
      } else {
        db.update_status(id, expected, new, Some(record.end_date))
          .await?;
      }
      print_json(&record)
    }

    Commands::Cancel { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let record = graph.cancel(id)?;
      db.cancel(id, Some(record.end_date)).await?;
      print_json(&record)
    }

    Commands::Delete { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let deleted = graph.delete_instance(id)?;
      db.delete_instance(id).await?;
      print_json(&deleted)
    }

    Commands::Root { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      print_json(&graph.get_root(id)?)
    }

    Commands::Descendants { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let mut descendants = graph.get_descendants(id)?;
      descendants.sort_by_key(|r| r.id);
      print_json(&descendants)
    }

    Commands::Path { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      println!("{}", graph.get_output_path(id)?);
      Ok(())
    }

    Commands::Lock { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      graph.acquire_lock(id)?;
      db.insert_lock(id).await?;
      print_json(&serde_json::json!({ "locked": id }))
    }

    Commands::Unlock { id } => {
      let released = db.delete_lock(id).await?;
      print_json(&serde_json::json!({ "unlocked": id, "released": released }))
    }

    Commands::Split {
      parent,
      owner,
      filter,
      plugins,
    } => {
      let (_, graph) = load_graph(&db, settings).await?;
      graph.get(parent)?;
      let children = plugins
        .into_iter()
        .map(|plugin| NewInstance::new(plugin, owner.clone()))
        .collect();

      // Hold the database lock for the duration so other processes see it.
      db.insert_lock(parent).await?;
      let outcome = split(&db, &graph, parent, &filter, children).await;
      db.delete_lock(parent).await?;
      print_json(&outcome?)
    }

    Commands::Splits { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      graph.get(id)?;
      print_json(&db.list_splits(id).await?)
    }

    Commands::Params { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      print_json(&graph.parameters(id)?)
    }

    Commands::AddFile { id, fname } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let file = graph.register_file(id, &fname)?;
      db.insert_file(&file).await?;
      print_json(&file)
    }

    Commands::Files { id } => {
      let (_, graph) = load_graph(&db, settings).await?;
      graph.get(id)?;
      print_json(&graph.files(&FileFilter {
        plugin_inst_id: Some(id),
        ..Default::default()
      }))
    }

    Commands::Query {
      json,
      status,
      owner,
      root,
      feed,
      plugin_name,
      title,
    } => {
      let (_, graph) = load_graph(&db, settings).await?;
      let mut filter: InstanceFilter = match json {
        Some(json) => serde_json::from_str(&json).context("failed to parse filter JSON")?,
        None => InstanceFilter::default(),
      };
      filter.status = status.or(filter.status);
      filter.owner_username = owner.or(filter.owner_username);
      filter.root_id = root.or(filter.root_id);
      filter.feed_id = feed.or(filter.feed_id);
      filter.plugin_name = plugin_name.or(filter.plugin_name);
      filter.title = title.or(filter.title);
      print_json(&graph.query(&filter)?)
    }
  }
}

/// Create the split children in memory, then write them together with the
/// split record in one transaction.
async fn split(
  db: &SqliteStore,
  graph: &InstanceStore,
  parent: InstanceId,
  filter: &str,
  children: Vec<NewInstance>,
) -> Result<serde_json::Value> {
  let (split, created) = graph.split_instance(parent, filter, children)?;
  let rows = created
    .iter()
    .map(|record| CreatedInstance::from_graph(graph, record.clone()))
    .collect::<Result<Vec<_>, _>>()?;
  db.insert_split_with_children(&split, &rows).await?;
  Ok(serde_json::json!({ "split": split, "created": created }))
}
