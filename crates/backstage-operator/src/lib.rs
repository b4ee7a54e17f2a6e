//! Core of the Backstage operator: turns a `Backstage` custom resource, the
//! object templates and the ConfigMaps and Secrets it references into the
//! runtime objects of a Backstage instance and keeps them in sync.

pub mod builder;
pub mod cli;
pub mod client;
pub mod controller;
pub mod crd;
pub mod external_config;
pub mod kvp;
pub mod logging;
pub mod merge;
pub mod model;
pub mod namespace;
pub mod status;
pub mod template;
pub mod utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
