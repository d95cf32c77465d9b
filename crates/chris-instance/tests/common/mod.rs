#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use chris_config::InstanceSettings;
use chris_instance::{Clock, InstanceStore};
use chris_plugin::{
  ComputeResource, InMemoryCatalog, ParameterType, Plugin, PluginParameter, PluginType,
};

pub const DIRCOPY: u64 = 1;
pub const SIMPLEDSAPP: u64 = 2;
pub const TOPOLOGICALCOPY: u64 = 3;

pub const DIR_PARAM: u64 = 1;
pub const PREFIX_PARAM: u64 = 2;
pub const SLEEP_PARAM: u64 = 3;

/// Clock that advances one second per call.
pub struct StepClock {
  next: AtomicI64,
}

impl StepClock {
  pub fn new() -> Self {
    Self {
      next: AtomicI64::new(1_700_000_000),
    }
  }
}

impl Clock for StepClock {
  fn now(&self) -> DateTime<Utc> {
    let secs = self.next.fetch_add(1, Ordering::SeqCst);
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
  }
}

pub fn test_catalog() -> Arc<InMemoryCatalog> {
  let catalog = InMemoryCatalog::new();
  catalog
    .add_plugin(Plugin::new(DIRCOPY, "dircopy", "2.1.1", PluginType::Fs))
    .unwrap();
  catalog
    .add_plugin(Plugin::new(SIMPLEDSAPP, "simpledsapp", "2.0.2", PluginType::Ds))
    .unwrap();
  catalog
    .add_plugin(Plugin::new(
      TOPOLOGICALCOPY,
      "topologicalcopy",
      "0.2",
      PluginType::Ts,
    ))
    .unwrap();

  for (id, plugin_id, name, param_type) in [
    (DIR_PARAM, DIRCOPY, "dir", ParameterType::Path),
    (PREFIX_PARAM, SIMPLEDSAPP, "prefix", ParameterType::String),
    (SLEEP_PARAM, SIMPLEDSAPP, "sleepLength", ParameterType::Integer),
  ] {
    catalog
      .add_parameter(PluginParameter {
        id,
        plugin_id,
        name: name.to_string(),
        param_type,
        optional: true,
      })
      .unwrap();
  }

  catalog
    .add_compute_resource(ComputeResource {
      id: 1,
      name: "host".to_string(),
    })
    .unwrap();

  Arc::new(catalog)
}

pub fn test_store() -> InstanceStore {
  InstanceStore::new(test_catalog(), InstanceSettings::default())
    .with_clock(Arc::new(StepClock::new()))
}
