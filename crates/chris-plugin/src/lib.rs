//! ChRIS Plugin
//!
//! Plugin descriptors as seen by the instance graph. A plugin is an immutable,
//! versioned description of a computational step: its type (data source or
//! data step), its parameters and the minimum compute resources it needs.
//!
//! The [`PluginCatalog`] trait is the lookup the instance graph consumes;
//! [`InMemoryCatalog`] is the implementation used by the CLI and tests.

mod catalog;
mod error;
mod plugin;
mod quantity;

pub use catalog::{InMemoryCatalog, PluginCatalog};
pub use error::PluginError;
pub use plugin::{
  ComputeResource, ComputeResourceId, ParameterId, ParameterType, Plugin, PluginId,
  PluginParameter, PluginType,
};
pub use quantity::{CpuQuantity, MemoryQuantity};
