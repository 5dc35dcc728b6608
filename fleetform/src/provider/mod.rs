//! Provider client contract.
//!
//! Drivers talk to the cloud control plane only through [`ProviderClient`].
//! Mutating calls hand back a [`Completion`] that delivers exactly one
//! terminal result; the driver blocks on it with a wall-clock timeout. Retry
//! and backoff against the transport belong to the implementation, not to
//! the drivers.

pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::catalog::ImageReference;

pub use memory::InMemoryProvider;

/// Errors reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("provider failure: {0}")]
    Failed(String),
    #[error("no completion after {0:?}")]
    Timeout(Duration),
    #[error("completion channel closed without a result")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskCreateOption {
    FromImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsDisk {
    pub os_type: OsType,
    pub create_option: DiskCreateOption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProfile {
    pub os_disk: OsDisk,
    pub image_reference: ImageReference,
}

/// One IP configuration per wired subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub name: String,
    pub subnet_id: String,
    pub backend_pool_ids: Vec<String>,
    pub nat_pool_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceConfiguration {
    pub name: String,
    pub primary: bool,
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub interfaces: Vec<NetworkInterfaceConfiguration>,
}

impl NetworkProfile {
    /// All IP configurations across interfaces.
    pub fn ip_configurations(&self) -> impl Iterator<Item = &IpConfiguration> {
        self.interfaces.iter().flat_map(|i| i.ip_configurations.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradePolicy {
    Automatic,
}

/// Capacity of a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub name: String,
    pub tier: String,
    pub capacity: u64,
}

/// Full create/update request for a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetRequest {
    pub location: String,
    pub tags: BTreeMap<String, String>,
    pub storage: StorageProfile,
    pub network: NetworkProfile,
    pub upgrade_policy: UpgradePolicy,
    pub sku: Sku,
}

/// Scale set as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetDescriptor {
    pub id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub image_reference: Option<ImageReference>,
    pub sku: Option<Sku>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub location: String,
    pub tags: BTreeMap<String, String>,
}

/// Resource group as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub id: String,
    pub name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,
}

/// Single terminal result of an asynchronous provider operation.
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, ProviderError>>,
}

/// Producer half of a [`Completion`].
pub struct CompletionSender<T> {
    tx: oneshot::Sender<Result<T, ProviderError>>,
}

impl<T> CompletionSender<T> {
    /// Deliver the terminal result. A waiter that already gave up is ignored.
    pub fn complete(self, result: Result<T, ProviderError>) {
        let _ = self.tx.send(result);
    }
}

impl<T> Completion<T> {
    pub fn channel() -> (CompletionSender<T>, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender { tx }, Completion { rx })
    }

    /// A completion whose result is already known.
    pub fn ready(result: Result<T, ProviderError>) -> Self {
        let (tx, completion) = Self::channel();
        tx.complete(result);
        completion
    }

    /// Block until the operation completes, fails or `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<T, ProviderError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProviderError::Closed),
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }
}

/// Operations the drivers consume from the cloud control plane.
///
/// `group` is the cluster's resource group, which is named after the cluster.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_scale_set(&self, group: &str, name: &str)
        -> Result<ScaleSetDescriptor, ProviderError>;

    async fn create_or_update_scale_set(
        &self,
        group: &str,
        name: &str,
        request: ScaleSetRequest,
    ) -> Completion<ScaleSetDescriptor>;

    async fn delete_scale_set(&self, group: &str, name: &str) -> Completion<()>;

    async fn get_group(&self, name: &str) -> Result<GroupDescriptor, ProviderError>;

    async fn create_or_update_group(
        &self,
        name: &str,
        request: GroupRequest,
    ) -> Completion<GroupDescriptor>;

    async fn delete_group(&self, name: &str) -> Completion<()>;
}
