//! fleetform: converges a declared cluster with the resources provisioned in
//! a cloud account, one resource kind at a time.

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod error;
pub mod provider;
pub mod reconciler;
pub mod resource;

pub use catalog::{Catalog, CatalogError, StaticCatalog};
pub use cluster::Cluster;
pub use config::Config;
pub use error::ReconcileError;
pub use provider::{ProviderClient, ProviderError};
pub use reconciler::{Interrupted, Reconciler, Report};
pub use resource::{Resource, ResourceKind, Snapshot};
