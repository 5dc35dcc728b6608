//! Resource drivers.
//!
//! Every resource kind implements the same four phases. `actual` observes the
//! provider, `expected` reads the declared cluster, `apply` converges the two
//! and `delete` tears the resource down. Each phase returns a freshly rendered
//! cluster instead of mutating the one it was given.

pub mod compare;
pub mod resource_group;
pub mod vmss;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{defaults, Cluster};
use crate::error::Result;

pub use resource_group::ResourceGroup;
pub use vmss::VmScaleSet;

/// Default bound on waiting for a provider completion.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Resource kinds, in the order they are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ResourceGroup,
    VmScaleSet,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::ResourceGroup => write!(f, "resource group"),
            ResourceKind::VmScaleSet => write!(f, "scale set"),
        }
    }
}

/// Fields every snapshot carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shared {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    /// Provider identifier, empty when the resource is not provisioned.
    pub identifier: String,
    /// When the snapshot was taken. Not compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl Shared {
    pub fn new(name: &str, tags: BTreeMap<String, String>, identifier: &str) -> Self {
        Self {
            name: name.to_string(),
            tags,
            identifier: identifier.to_string(),
            observed_at: Some(Utc::now()),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        !self.identifier.is_empty()
    }
}

/// Scale set snapshot, one per server pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetSnapshot {
    #[serde(flatten)]
    pub shared: Shared,
    /// Abstract image name.
    pub image: String,
    /// Abstract size class.
    pub size: String,
    pub capacity: u64,
}

/// Resource group snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupSnapshot {
    #[serde(flatten)]
    pub shared: Shared,
    pub location: String,
}

/// Observed or declared state of one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    ResourceGroup(ResourceGroupSnapshot),
    VmScaleSet(ScaleSetSnapshot),
}

impl Snapshot {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Snapshot::ResourceGroup(_) => ResourceKind::ResourceGroup,
            Snapshot::VmScaleSet(_) => ResourceKind::VmScaleSet,
        }
    }

    pub fn shared(&self) -> &Shared {
        match self {
            Snapshot::ResourceGroup(s) => &s.shared,
            Snapshot::VmScaleSet(s) => &s.shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared().name
    }

    pub fn identifier(&self) -> &str {
        &self.shared().identifier
    }

    pub fn is_provisioned(&self) -> bool {
        self.shared().is_provisioned()
    }
}

/// Where a resource stands in one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Unknown,
    Observed,
    Diffed,
    NoOp,
    Converging,
    Converged,
    Deleted,
}

/// The four-phase reconciliation contract.
///
/// Implementations are driven by the [`Reconciler`](crate::reconciler::Reconciler),
/// which never runs two invocations for the same (cluster, kind) at once.
#[async_trait]
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Name of the resource instance this driver manages.
    fn name(&self) -> &str;

    /// Observe the provider. Only queries when an identifier is recorded.
    async fn actual(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)>;

    /// Build the declared snapshot. Never calls the provider.
    async fn expected(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)>;

    /// Converge `actual` towards `expected`. Equal snapshots are a no-op and
    /// return `cluster` unchanged.
    async fn apply(
        &self,
        actual: &Snapshot,
        expected: &Snapshot,
        cluster: &Cluster,
    ) -> Result<(Cluster, Snapshot)>;

    /// Tear the resource down. `actual` must carry an identifier.
    async fn delete(&self, actual: &Snapshot, cluster: &Cluster) -> Result<(Cluster, Snapshot)>;
}

/// Fold a driver's cluster update into a freshly rendered cluster.
pub(crate) fn immutable_render(cluster: &Cluster, fold: impl FnOnce(&Cluster) -> Cluster) -> Cluster {
    defaults::render(&fold(cluster))
}
