//! Integration tests for InMemoryCatalog.

use chris_plugin::{
  ComputeResource, InMemoryCatalog, ParameterType, Plugin, PluginCatalog, PluginError,
  PluginParameter, PluginType,
};

fn param(id: u64, plugin_id: u64, name: &str, param_type: ParameterType) -> PluginParameter {
  PluginParameter {
    id,
    plugin_id,
    name: name.to_string(),
    param_type,
    optional: true,
  }
}

#[test]
fn test_register_and_lookup() {
  let catalog = InMemoryCatalog::new();
  catalog
    .add_plugin(Plugin::new(1, "pl-dircopy", "2.1.0", PluginType::Fs))
    .unwrap();
  catalog
    .add_plugin(Plugin::new(2, "pl-simpledsapp", "2.0.0", PluginType::Ds))
    .unwrap();
  catalog
    .add_parameter(param(10, 1, "dir", ParameterType::Path))
    .unwrap();
  catalog
    .add_parameter(param(11, 2, "prefix", ParameterType::String))
    .unwrap();
  catalog
    .add_parameter(param(12, 2, "sleepLength", ParameterType::Integer))
    .unwrap();

  assert_eq!(catalog.plugin(1).unwrap().name, "pl-dircopy");
  assert!(catalog.plugin(99).is_none());
  assert_eq!(catalog.parameter(10).unwrap().param_type, ParameterType::Path);

  let names: Vec<String> = catalog.parameters(2).into_iter().map(|p| p.name).collect();
  assert_eq!(names, vec!["prefix", "sleepLength"]);
  assert_eq!(catalog.plugins().len(), 2);
}

#[test]
fn test_duplicate_plugin_rejected() {
  let catalog = InMemoryCatalog::new();
  catalog
    .add_plugin(Plugin::new(1, "pl-dircopy", "2.1.0", PluginType::Fs))
    .unwrap();

  let err = catalog
    .add_plugin(Plugin::new(1, "pl-other", "1.0.0", PluginType::Ds))
    .unwrap_err();
  assert_eq!(
    err,
    PluginError::AlreadyExists {
      kind: "plugin",
      id: 1
    }
  );
}

#[test]
fn test_parameter_for_unknown_plugin_rejected() {
  let catalog = InMemoryCatalog::new();
  let err = catalog
    .add_parameter(param(10, 7, "dir", ParameterType::Path))
    .unwrap_err();

  assert_eq!(
    err,
    PluginError::NotFound {
      kind: "plugin",
      id: 7
    }
  );
}

#[test]
fn test_compute_resources() {
  let catalog = InMemoryCatalog::new();
  catalog
    .add_compute_resource(ComputeResource {
      id: 1,
      name: "host".to_string(),
    })
    .unwrap();

  assert_eq!(catalog.compute_resource(1).unwrap().name, "host");
  assert!(catalog.remove_compute_resource(1).is_some());
  assert!(catalog.compute_resource(1).is_none());
  assert!(catalog.remove_compute_resource(1).is_none());
}
