//! Resource group driver - the group every other cluster resource lives in.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::vmss::CLUSTER_TAG;
use super::compare::{self, KindMismatch};
use super::{
    immutable_render, Resource, ResourceGroupSnapshot, ResourceKind, Shared, Snapshot,
    DEFAULT_OPERATION_TIMEOUT,
};
use crate::cluster::{defaults, Cluster};
use crate::error::{ReconcileError, Result};
use crate::provider::{GroupRequest, ProviderClient, ProviderError};

/// Resource group driver. The group is named after the cluster.
pub struct ResourceGroup {
    name: String,
    provider: Arc<dyn ProviderClient>,
    timeout: Duration,
}

impl ResourceGroup {
    pub fn new(cluster: &str, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            name: cluster.to_string(),
            provider,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert(CLUSTER_TAG.to_string(), self.name.clone());
        tags
    }
}

#[async_trait]
impl Resource for ResourceGroup {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ResourceGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn actual(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Observing resource group {}", self.name);
        let mut snapshot = ResourceGroupSnapshot {
            shared: Shared::new(&self.name, self.tags(), &cluster.group_identifier),
            location: String::new(),
        };

        if !cluster.group_identifier.is_empty() {
            match self.provider.get_group(&self.name).await {
                Ok(group) => {
                    snapshot.shared.identifier = group.id;
                    snapshot.location = group.location;
                    snapshot.shared.tags = group.tags;
                }
                Err(ProviderError::NotFound(_)) => {
                    warn!("Resource group {} is gone, treating as unprovisioned", self.name);
                    snapshot.shared.identifier.clear();
                }
                Err(source) => {
                    return Err(ReconcileError::ProviderQuery {
                        kind: ResourceKind::ResourceGroup,
                        cluster: cluster.name.clone(),
                        resource: self.name.clone(),
                        source,
                    })
                }
            }
        }

        let identifier = snapshot.shared.identifier.clone();
        let next = immutable_render(cluster, |c| c.with_group_identifier(&identifier));
        Ok((next, Snapshot::ResourceGroup(snapshot)))
    }

    async fn expected(&self, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Declaring resource group {}", self.name);
        let declared = defaults::render(cluster);
        let snapshot = ResourceGroupSnapshot {
            shared: Shared::new(&self.name, self.tags(), &declared.group_identifier),
            location: declared.location.clone(),
        };
        Ok((declared, Snapshot::ResourceGroup(snapshot)))
    }

    async fn apply(
        &self,
        actual: &Snapshot,
        expected: &Snapshot,
        cluster: &Cluster,
    ) -> Result<(Cluster, Snapshot)> {
        debug!("Applying resource group {}", self.name);
        let equal = compare::is_equal(actual, expected)
            .map_err(|mismatch| mismatch.within(&cluster.name, &self.name))?;
        if equal {
            return Ok((cluster.clone(), expected.clone()));
        }
        let wanted = match expected {
            Snapshot::ResourceGroup(s) => s,
            other => {
                let mismatch = KindMismatch {
                    actual: other.kind(),
                    expected: ResourceKind::ResourceGroup,
                };
                return Err(mismatch.within(&cluster.name, &self.name));
            }
        };

        info!("Creating resource group {} in {}", self.name, wanted.location);
        let request = GroupRequest {
            location: wanted.location.clone(),
            tags: wanted.shared.tags.clone(),
        };
        let group = self
            .provider
            .create_or_update_group(&self.name, request)
            .await
            .wait(self.timeout)
            .await
            .map_err(|source| ReconcileError::Apply {
                kind: ResourceKind::ResourceGroup,
                cluster: cluster.name.clone(),
                resource: self.name.clone(),
                source,
            })?;

        let mut applied = wanted.clone();
        applied.shared.identifier = group.id.clone();
        applied.shared.observed_at = Some(Utc::now());

        let next = immutable_render(cluster, |c| c.with_group_identifier(&group.id));
        Ok((next, Snapshot::ResourceGroup(applied)))
    }

    async fn delete(&self, actual: &Snapshot, cluster: &Cluster) -> Result<(Cluster, Snapshot)> {
        debug!("Deleting resource group {}", self.name);
        let doomed = match actual {
            Snapshot::ResourceGroup(s) => s,
            other => {
                let mismatch = KindMismatch {
                    actual: other.kind(),
                    expected: ResourceKind::ResourceGroup,
                };
                return Err(mismatch.within(&cluster.name, &self.name));
            }
        };
        if !doomed.shared.is_provisioned() {
            return Err(ReconcileError::Precondition {
                kind: ResourceKind::ResourceGroup,
                cluster: cluster.name.clone(),
                resource: self.name.clone(),
                reason: "cannot delete an unprovisioned resource".to_string(),
            });
        }

        info!("Deleting resource group {}", self.name);
        self.provider
            .delete_group(&self.name)
            .await
            .wait(self.timeout)
            .await
            .map_err(|source| ReconcileError::Delete {
                kind: ResourceKind::ResourceGroup,
                cluster: cluster.name.clone(),
                resource: self.name.clone(),
                source,
            })?;

        let mut deleted = doomed.clone();
        deleted.shared.identifier.clear();
        deleted.shared.observed_at = Some(Utc::now());

        let next = immutable_render(cluster, |c| c.with_group_identifier(""));
        Ok((next, Snapshot::ResourceGroup(deleted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::Operation;
    use crate::provider::InMemoryProvider;

    fn cluster() -> Cluster {
        Cluster {
            name: "kube".to_string(),
            location: String::new(),
            group_identifier: String::new(),
            server_pools: vec![],
            load_balancers: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_then_noop() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = ResourceGroup::new("kube", provider.clone());

        let (c, actual) = driver.actual(&cluster()).await.unwrap();
        let (c, expected) = driver.expected(&c).await.unwrap();
        let (c, applied) = driver.apply(&actual, &expected, &c).await.unwrap();
        assert!(applied.is_provisioned());
        assert_eq!(c.group_identifier, applied.identifier());
        assert_eq!(c.location, defaults::DEFAULT_LOCATION);

        let (c2, actual) = driver.actual(&c).await.unwrap();
        let (c2, expected) = driver.expected(&c2).await.unwrap();
        let (c3, _) = driver.apply(&actual, &expected, &c2).await.unwrap();
        assert_eq!(c3, c2);
        assert_eq!(provider.calls(Operation::CreateOrUpdateGroup).await, 1);
    }

    #[tokio::test]
    async fn test_delete_requires_identifier() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = ResourceGroup::new("kube", provider.clone());
        let (c, actual) = driver.actual(&cluster()).await.unwrap();

        let result = driver.delete(&actual, &c).await;
        assert!(matches!(result, Err(ReconcileError::Precondition { .. })));
        assert_eq!(provider.mutation_calls().await, 0);
    }

    #[tokio::test]
    async fn test_vanished_group_is_unprovisioned() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = ResourceGroup::new("kube", provider.clone());
        let (c, actual) = driver.actual(&cluster()).await.unwrap();
        let (c, expected) = driver.expected(&c).await.unwrap();
        let (c, _) = driver.apply(&actual, &expected, &c).await.unwrap();

        provider
            .delete_group("kube")
            .await
            .wait(Duration::from_secs(1))
            .await
            .unwrap();

        let (observed, actual) = driver.actual(&c).await.unwrap();
        assert_eq!(actual.identifier(), "");
        assert_eq!(observed.group_identifier, "");
        assert!(!c.group_identifier.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = ResourceGroup::new("kube", provider.clone());
        let mut c = cluster();
        c.group_identifier = "/rg/kube".to_string();
        provider
            .fail_next(
                Operation::GetGroup,
                ProviderError::Failed("throttled".to_string()),
            )
            .await;

        let result = driver.actual(&c).await;
        assert!(matches!(
            result,
            Err(ReconcileError::ProviderQuery {
                kind: ResourceKind::ResourceGroup,
                source: ProviderError::Failed(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_removed_tags_are_restored() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = ResourceGroup::new("kube", provider.clone());
        let (c, actual) = driver.actual(&cluster()).await.unwrap();
        let (c, expected) = driver.expected(&c).await.unwrap();
        let (c, _) = driver.apply(&actual, &expected, &c).await.unwrap();

        provider
            .create_or_update_group(
                "kube",
                GroupRequest {
                    location: defaults::DEFAULT_LOCATION.to_string(),
                    tags: BTreeMap::new(),
                },
            )
            .await
            .wait(Duration::from_secs(1))
            .await
            .unwrap();

        let (c, actual) = driver.actual(&c).await.unwrap();
        let (c, expected) = driver.expected(&c).await.unwrap();
        assert_eq!(compare::diff(&actual, &expected).unwrap(), vec!["tags"]);
        driver.apply(&actual, &expected, &c).await.unwrap();
        assert_eq!(provider.group("kube").await.unwrap().tags, driver.tags());
    }
}
