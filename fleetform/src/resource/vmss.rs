//! Scale set driver - one virtual machine scale set per server pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::compare::{self, KindMismatch};
use super::{
    immutable_render, Resource, ResourceKind, ScaleSetSnapshot, Shared, Snapshot,
    DEFAULT_OPERATION_TIMEOUT,
};
use crate::catalog::{Catalog, CatalogError};
use crate::cluster::{defaults, Cluster, ServerPool};
use crate::error::{ReconcileError, Result};
use crate::provider::{
    DiskCreateOption, IpConfiguration, NetworkInterfaceConfiguration, NetworkProfile, OsDisk,
    OsType, ProviderClient, ProviderError, ScaleSetDescriptor, ScaleSetRequest, Sku,
    StorageProfile, UpgradePolicy,
};

pub const CLUSTER_TAG: &str = "fleetform-cluster";
pub const POOL_TAG: &str = "fleetform-pool";

/// Scale set driver bound to one server pool.
pub struct VmScaleSet {
    pool: String,
    provider: Arc<dyn ProviderClient>,
    catalog: Arc<dyn Catalog>,
    timeout: Duration,
}

impl VmScaleSet {
    pub fn new(pool: &str, provider: Arc<dyn ProviderClient>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            pool: pool.to_string(),
            provider,
            catalog,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Bound on waiting for create/update and delete completions.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn server_pool<'a>(&self, cluster: &'a Cluster) -> Result<&'a ServerPool> {
        cluster
            .server_pool(&self.pool)
            .ok_or_else(|| ReconcileError::UnknownServerPool {
                kind: ResourceKind::VmScaleSet,
                cluster: cluster.name.clone(),
                resource: self.pool.clone(),
            })
    }

    fn unresolved(&self, cluster: &Cluster, reference: String) -> ReconcileError {
        ReconcileError::UnresolvedReference {
            kind: ResourceKind::VmScaleSet,
            cluster: cluster.name.clone(),
            resource: self.pool.clone(),
            reference,
        }
    }

    /// Snapshot fields as reported by the provider.
    ///
    /// The image is reported under the pool's own name when that name resolves
    /// to the running reference, so catalog aliases do not show up as drift.
    fn observed(&self, pool: &ServerPool, descriptor: ScaleSetDescriptor) -> ScaleSetSnapshot {
        let declared = self.catalog.image_reference(&pool.image).ok();
        let image = descriptor
            .image_reference
            .map(|r| {
                if declared.as_ref() == Some(&r) {
                    pool.image.clone()
                } else {
                    self.catalog.image_name(&r).unwrap_or_else(|| r.to_string())
                }
            })
            .unwrap_or_default();
        let (size, capacity) = descriptor
            .sku
            .map(|sku| (sku.name, sku.capacity))
            .unwrap_or_default();
        ScaleSetSnapshot {
            shared: Shared::new(&descriptor.name, descriptor.tags, &descriptor.id),
            image,
            size,
            capacity,
        }
    }

    /// One IP configuration per subnet of every master pool, whichever pool
    /// this driver is bound to.
    fn ip_configurations(&self, cluster: &Cluster) -> Result<Vec<IpConfiguration>> {
        let mut configs = Vec::new();
        for master in cluster.master_pools() {
            for subnet in &master.subnets {
                if subnet.identifier.is_empty() {
                    return Err(self.unresolved(
                        cluster,
                        format!("subnet {}/{}", master.name, subnet.name),
                    ));
                }
                for id in &subnet.load_balancer.backend_ids {
                    let lb = cluster
                        .backend_pool_owner(id)
                        .ok_or_else(|| self.unresolved(cluster, format!("backend pool {}", id)))?;
                    debug!("Wiring {} to backend pool {} of {}", self.pool, id, lb.name);
                }
                for id in &subnet.load_balancer.nat_ids {
                    let lb = cluster
                        .nat_pool_owner(id)
                        .ok_or_else(|| self.unresolved(cluster, format!("NAT pool {}", id)))?;
                    debug!("Wiring {} to NAT pool {} of {}", self.pool, id, lb.name);
                }
                configs.push(IpConfiguration {
                    name: format!("{}-{}", master.name, subnet.name),
                    subnet_id: subnet.identifier.clone(),
                    backend_pool_ids: subnet.load_balancer.backend_ids.clone(),
                    nat_pool_ids: subnet.load_balancer.nat_ids.clone(),
                });
            }
        }
        Ok(configs)
    }

    /// Full create/update request. Catalog and wiring failures surface here,
    /// before anything reaches the provider.
    fn request(&self, expected: &ScaleSetSnapshot, cluster: &Cluster) -> Result<ScaleSetRequest> {
        let catalog_error = |source: CatalogError| ReconcileError::UnknownCatalogEntry {
            kind: ResourceKind::VmScaleSet,
            cluster: cluster.name.clone(),
            resource: self.pool.clone(),
            source,
        };
        let image_reference = self
            .catalog
            .image_reference(&expected.image)
            .map_err(catalog_error)?;
        let tier = self.catalog.tier(&expected.size).map_err(catalog_error)?;
        let ip_configurations = self.ip_configurations(cluster)?;

        Ok(ScaleSetRequest {
            location: cluster.location.clone(),
            tags: expected.shared.tags.clone(),
            storage: StorageProfile {
                os_disk: OsDisk {
                    os_type: OsType::Linux,
                    create_option: DiskCreateOption::FromImage,
                },
                image_reference,
            },
            network: NetworkProfile {
                interfaces: vec![NetworkInterfaceConfiguration {
                    name: format!("{}-nic", self.pool),
                    primary: true,
                    ip_configurations,
                }],
            },
            upgrade_policy: UpgradePolicy::Automatic,
            sku: Sku {
                name: expected.size.clone(),
                tier,
                capacity: expected.capacity,
            },
        })
    }
}

/// Tags a pool's scale set carries: the pool's own plus cluster and pool names.
pub fn pool_tags(cluster: &Cluster, pool: &ServerPool) -> BTreeMap<String, String> {
    let mut tags = pool.tags.clone();
    tags.insert(CLUSTER_TAG.to_string(), cluster.name.clone());
    tags.insert(POOL_TAG.to_string(), pool.name.clone());
    tags
}

#[async_trait]
impl Resource for VmScaleSet {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VmScaleSet
    }

    fn name(&self) -> &str {
        &self.pool
    }

    async fn actual(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Observing scale set {}", self.pool);
        let declared = defaults::render(cluster);
        let pool = self.server_pool(&declared)?;

        let mut snapshot = ScaleSetSnapshot {
            shared: Shared::new(&pool.name, pool_tags(&declared, pool), &pool.identifier),
            ..ScaleSetSnapshot::default()
        };

        if !pool.identifier.is_empty() {
            match self.provider.get_scale_set(&declared.name, &pool.name).await {
                Ok(descriptor) => snapshot = self.observed(pool, descriptor),
                Err(ProviderError::NotFound(_)) => {
                    warn!(
                        "Scale set {} recorded as {} is gone, treating as unprovisioned",
                        pool.name, pool.identifier
                    );
                    snapshot.shared.identifier.clear();
                }
                Err(source) => {
                    return Err(ReconcileError::ProviderQuery {
                        kind: ResourceKind::VmScaleSet,
                        cluster: declared.name.clone(),
                        resource: pool.name.clone(),
                        source,
                    })
                }
            }
        }

        let identifier = snapshot.shared.identifier.clone();
        let next = immutable_render(cluster, |c| c.with_pool_identifier(&self.pool, &identifier));
        Ok((next, Snapshot::VmScaleSet(snapshot)))
    }

    async fn expected(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Declaring scale set {}", self.pool);
        let declared = defaults::render(cluster);
        let pool = self.server_pool(&declared)?;

        let snapshot = ScaleSetSnapshot {
            shared: Shared::new(&pool.name, pool_tags(&declared, pool), &pool.identifier),
            image: pool.image.clone(),
            size: pool.size.clone(),
            capacity: u64::from(pool.max_count),
        };
        Ok((declared, Snapshot::VmScaleSet(snapshot)))
    }

    async fn apply(
        &self,
        actual: &Snapshot,
        expected: &Snapshot,
        cluster: &Cluster,
    ) -> Result<(Cluster, Snapshot)> {
        debug!("Applying scale set {}", self.pool);
        let drift = compare::diff(actual, expected)
            .map_err(|mismatch| mismatch.within(&cluster.name, &self.pool))?;
        if drift.is_empty() {
            debug!("Scale set {} is up to date", self.pool);
            return Ok((cluster.clone(), expected.clone()));
        }

        let (actual, wanted) = match (actual, expected) {
            (Snapshot::VmScaleSet(a), Snapshot::VmScaleSet(e)) => (a, e),
            (a, e) => {
                let mismatch = KindMismatch {
                    actual: a.kind(),
                    expected: e.kind(),
                };
                return Err(mismatch.within(&cluster.name, &self.pool));
            }
        };

        let declared = defaults::render(cluster);
        let request = self.request(wanted, &declared)?;

        if actual.shared.is_provisioned() {
            info!("Updating scale set {} (drift: {})", self.pool, drift.join(", "));
        } else {
            info!("Creating scale set {} in {}", self.pool, declared.location);
        }

        let descriptor = self
            .provider
            .create_or_update_scale_set(&declared.name, &wanted.shared.name, request)
            .await
            .wait(self.timeout)
            .await
            .map_err(|source| ReconcileError::Apply {
                kind: ResourceKind::VmScaleSet,
                cluster: declared.name.clone(),
                resource: self.pool.clone(),
                source,
            })?;

        info!("Scale set {} converged as {}", self.pool, descriptor.id);
        let mut applied = wanted.clone();
        applied.shared.identifier = descriptor.id.clone();
        applied.shared.observed_at = Some(Utc::now());

        let next = immutable_render(cluster, |c| {
            c.with_pool_identifier(&self.pool, &descriptor.id)
        });
        Ok((next, Snapshot::VmScaleSet(applied)))
    }

    async fn delete(&self, actual: &Snapshot, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Deleting scale set {}", self.pool);
        let doomed = match actual {
            Snapshot::VmScaleSet(s) => s,
            other => {
                let mismatch = KindMismatch {
                    actual: other.kind(),
                    expected: ResourceKind::VmScaleSet,
                };
                return Err(mismatch.within(&cluster.name, &self.pool));
            }
        };
        if !doomed.shared.is_provisioned() {
            return Err(ReconcileError::Precondition {
                kind: ResourceKind::VmScaleSet,
                cluster: cluster.name.clone(),
                resource: doomed.shared.name.clone(),
                reason: "cannot delete an unprovisioned resource".to_string(),
            });
        }

        info!("Deleting scale set {} ({})", doomed.shared.name, doomed.shared.identifier);
        self.provider
            .delete_scale_set(&cluster.name, &doomed.shared.name)
            .await
            .wait(self.timeout)
            .await
            .map_err(|source| ReconcileError::Delete {
                kind: ResourceKind::VmScaleSet,
                cluster: cluster.name.clone(),
                resource: doomed.shared.name.clone(),
                source,
            })?;

        let mut deleted = doomed.clone();
        deleted.shared.identifier.clear();
        deleted.shared.observed_at = Some(Utc::now());

        let next = immutable_render(cluster, |c| c.with_pool_identifier(&self.pool, ""));
        Ok((next, Snapshot::VmScaleSet(deleted)))
    }
}
