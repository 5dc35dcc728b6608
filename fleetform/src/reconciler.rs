//! Reconciler - drives resource drivers over a whole cluster.
//!
//! Resources run in dependency order (resource group before scale sets) and
//! are torn down in reverse. Invocations touching the same resource kind of
//! the same cluster are serialized; different kinds or clusters may run
//! concurrently from different tasks sharing one [`Reconciler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::cluster::Cluster;
use crate::error::ReconcileError;
use crate::provider::ProviderClient;
use crate::resource::{compare, Resource, ResourceGroup, ResourceKind, ResourceState, VmScaleSet};

/// Outcome for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: ResourceKind,
    pub name: String,
    pub state: ResourceState,
    /// Provider identifier after the pass, empty if not provisioned.
    pub identifier: String,
    /// Fields that differed between actual and expected.
    pub drift: Vec<String>,
}

/// Outcome of a pass over a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn entry(&self, kind: ResourceKind, name: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.name == name)
    }

    /// True when nothing needed provider-side work.
    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|e| e.state == ResourceState::NoOp)
    }
}

/// A pass stopped at a failing resource.
///
/// `cluster` holds every update made before the failure, so a caller can
/// persist it and reconcile again.
#[derive(Debug, Error)]
#[error("reconciliation of cluster {} stopped: {error}", .cluster.name)]
pub struct Interrupted {
    pub cluster: Cluster,
    pub report: Report,
    #[source]
    pub error: ReconcileError,
}

/// Sequences resource drivers over a cluster.
pub struct Reconciler {
    resources: Vec<Arc<dyn Resource>>,
    /// Writer locks per (cluster, kind). Idle entries are dropped when a
    /// whole-cluster pass ends.
    locks: Mutex<HashMap<(String, ResourceKind), Arc<Mutex<()>>>>,
}

impl Reconciler {
    /// Drivers are ordered by kind; declaration order is kept within a kind.
    pub fn new(mut resources: Vec<Arc<dyn Resource>>) -> Self {
        resources.sort_by_key(|r| r.kind());
        Self {
            resources,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The standard driver set for a cluster: its resource group and one
    /// scale set per server pool.
    pub fn for_cluster(
        cluster: &Cluster,
        provider: Arc<dyn ProviderClient>,
        catalog: Arc<dyn Catalog>,
        timeout: Duration,
    ) -> Self {
        let mut resources: Vec<Arc<dyn Resource>> = vec![Arc::new(
            ResourceGroup::new(&cluster.name, Arc::clone(&provider)).with_timeout(timeout),
        )];
        for pool in &cluster.server_pools {
            resources.push(Arc::new(
                VmScaleSet::new(&pool.name, Arc::clone(&provider), Arc::clone(&catalog))
                    .with_timeout(timeout),
            ));
        }
        Self::new(resources)
    }

    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }

    /// Take the writer lock for one (cluster, kind) pair.
    async fn lock(&self, cluster: &str, kind: ResourceKind) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry((cluster.to_string(), kind))
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drop the cluster's locks nobody holds or waits on.
    async fn release(&self, cluster: &str) {
        self.locks
            .lock()
            .await
            .retain(|(name, _), lock| name != cluster || Arc::strong_count(lock) > 1);
    }

    /// Run Actual, Expected and the comparison without touching the provider
    /// beyond reads.
    pub async fn plan(&self, cluster: &Cluster) -> Result<Report, ReconcileError> {
        let report = self.plan_resources(cluster).await;
        self.release(&cluster.name).await;
        report
    }

    async fn plan_resources(&self, cluster: &Cluster) -> Result<Report, ReconcileError> {
        let mut report = Report::default();
        for resource in &self.resources {
            let _guard = self.lock(&cluster.name, resource.kind()).await;
            let (observed, actual) = resource.actual(cluster).await?;
            let (_, expected) = resource.expected(&observed).await?;
            let drift = compare::diff(&actual, &expected)
                .map_err(|mismatch| mismatch.within(&cluster.name, resource.name()))?;
            report.entries.push(ReportEntry {
                kind: resource.kind(),
                name: resource.name().to_string(),
                state: if drift.is_empty() {
                    ResourceState::NoOp
                } else {
                    ResourceState::Diffed
                },
                identifier: actual.identifier().to_string(),
                drift: drift.into_iter().map(String::from).collect(),
            });
        }
        Ok(report)
    }

    /// Converge one resource and return the updated cluster.
    pub async fn reconcile_resource(
        &self,
        resource: &dyn Resource,
        cluster: &Cluster,
    ) -> Result<(Cluster, ReportEntry), ReconcileError> {
        let _guard = self.lock(&cluster.name, resource.kind()).await;
        let kind = resource.kind();
        let name = resource.name();
        let mut state = ResourceState::Unknown;
        debug!("{} {}: {:?}", kind, name, state);

        let (observed, actual) = resource.actual(cluster).await?;
        state = ResourceState::Observed;
        debug!("{} {}: {:?}", kind, name, state);

        let (declared, expected) = resource.expected(&observed).await?;
        let drift = compare::diff(&actual, &expected)
            .map_err(|mismatch| mismatch.within(&cluster.name, name))?;
        state = ResourceState::Diffed;
        debug!("{} {}: {:?} ({} fields)", kind, name, state, drift.len());

        if drift.is_empty() {
            state = ResourceState::NoOp;
            debug!("{} {}: {:?}", kind, name, state);
            return Ok((
                declared,
                ReportEntry {
                    kind,
                    name: name.to_string(),
                    state,
                    identifier: actual.identifier().to_string(),
                    drift: Vec::new(),
                },
            ));
        }

        state = ResourceState::Converging;
        debug!("{} {}: {:?}", kind, name, state);
        let (next, applied) = resource.apply(&actual, &expected, &declared).await?;
        state = ResourceState::Converged;
        info!("{} {} converged", kind, name);

        Ok((
            next,
            ReportEntry {
                kind,
                name: name.to_string(),
                state,
                identifier: applied.identifier().to_string(),
                drift: drift.into_iter().map(String::from).collect(),
            },
        ))
    }

    /// Converge every resource in dependency order.
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<(Cluster, Report), Interrupted> {
        let outcome = self.reconcile_resources(cluster).await;
        self.release(&cluster.name).await;
        outcome
    }

    async fn reconcile_resources(
        &self,
        cluster: &Cluster,
    ) -> Result<(Cluster, Report), Interrupted> {
        info!("Reconciling cluster {}", cluster.name);
        let mut current = cluster.clone();
        let mut report = Report::default();
        for resource in &self.resources {
            match self.reconcile_resource(resource.as_ref(), &current).await {
                Ok((next, entry)) => {
                    current = next;
                    report.entries.push(entry);
                }
                Err(error) => {
                    error!("Failed to reconcile {} {}: {}", resource.kind(), resource.name(), error);
                    return Err(Interrupted {
                        cluster: current,
                        report,
                        error,
                    });
                }
            }
        }
        Ok((current, report))
    }

    /// Tear one resource down if it is provisioned.
    pub async fn destroy_resource(
        &self,
        resource: &dyn Resource,
        cluster: &Cluster,
    ) -> Result<(Cluster, ReportEntry), ReconcileError> {
        let _guard = self.lock(&cluster.name, resource.kind()).await;
        let (observed, actual) = resource.actual(cluster).await?;
        let next = if actual.is_provisioned() {
            let (next, _) = resource.delete(&actual, &observed).await?;
            info!("{} {} deleted", resource.kind(), resource.name());
            next
        } else {
            debug!("{} {} not provisioned, nothing to delete", resource.kind(), resource.name());
            observed
        };
        Ok((
            next,
            ReportEntry {
                kind: resource.kind(),
                name: resource.name().to_string(),
                state: ResourceState::Deleted,
                identifier: String::new(),
                drift: Vec::new(),
            },
        ))
    }

    /// Tear every resource down in reverse dependency order.
    pub async fn destroy(&self, cluster: &Cluster) -> Result<(Cluster, Report), Interrupted> {
        let outcome = self.destroy_resources(cluster).await;
        self.release(&cluster.name).await;
        outcome
    }

    async fn destroy_resources(&self, cluster: &Cluster) -> Result<(Cluster, Report), Interrupted> {
        info!("Destroying cluster {}", cluster.name);
        let mut current = cluster.clone();
        let mut report = Report::default();
        for resource in self.resources.iter().rev() {
            match self.destroy_resource(resource.as_ref(), &current).await {
                Ok((next, entry)) => {
                    current = next;
                    report.entries.push(entry);
                }
                Err(error) => {
                    error!("Failed to delete {} {}: {}", resource.kind(), resource.name(), error);
                    return Err(Interrupted {
                        cluster: current,
                        report,
                        error,
                    });
                }
            }
        }
        Ok((current, report))
    }
}
