//! Shared fixtures for fleetform integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fleetform::catalog::StaticCatalog;
use fleetform::cluster::{Cluster, LoadBalancer, ServerPool, ServerPoolType, Subnet, SubnetLoadBalancer};
use fleetform::provider::InMemoryProvider;
use fleetform::resource::VmScaleSet;
use fleetform::Reconciler;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn pool(name: &str, pool_type: ServerPoolType, subnets: Vec<Subnet>) -> ServerPool {
    ServerPool {
        name: name.to_string(),
        pool_type,
        identifier: String::new(),
        image: "ubuntu-16.04-x64".to_string(),
        size: "Standard_DS2_v2".to_string(),
        min_count: 1,
        max_count: 3,
        subnets,
        tags: BTreeMap::new(),
    }
}

pub fn subnet(name: &str, identifier: &str, backend: &str, nat: &str) -> Subnet {
    Subnet {
        name: name.to_string(),
        identifier: identifier.to_string(),
        load_balancer: SubnetLoadBalancer {
            backend_ids: vec![backend.to_string()],
            nat_ids: vec![nat.to_string()],
        },
    }
}

pub fn load_balancer(name: &str, backend: &str, nat: &str) -> LoadBalancer {
    LoadBalancer {
        name: name.to_string(),
        identifier: format!("/loadBalancers/{}", name),
        backend_pool_ids: vec![backend.to_string()],
        nat_pool_ids: vec![nat.to_string()],
    }
}

/// Two master pools, each with one subnet wired to its own load balancer
/// (`B1`/`N1` and `B2`/`N2`), plus one worker pool.
pub fn two_master_cluster() -> Cluster {
    Cluster {
        name: "kube".to_string(),
        location: "westeurope".to_string(),
        group_identifier: String::new(),
        server_pools: vec![
            pool(
                "master-a",
                ServerPoolType::Master,
                vec![subnet("a", "/subnets/a", "B1", "N1")],
            ),
            pool(
                "master-b",
                ServerPoolType::Master,
                vec![subnet("b", "/subnets/b", "B2", "N2")],
            ),
            pool("workers", ServerPoolType::Node, vec![]),
        ],
        load_balancers: vec![
            load_balancer("lb-a", "B1", "N1"),
            load_balancer("lb-b", "B2", "N2"),
        ],
    }
}

pub struct Harness {
    pub provider: Arc<InMemoryProvider>,
    pub catalog: Arc<StaticCatalog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_catalog(StaticCatalog::default())
    }

    pub fn with_catalog(catalog: StaticCatalog) -> Self {
        Self {
            provider: Arc::new(InMemoryProvider::new()),
            catalog: Arc::new(catalog),
        }
    }

    pub fn scale_set(&self, pool: &str) -> VmScaleSet {
        VmScaleSet::new(pool, self.provider.clone(), self.catalog.clone()).with_timeout(TIMEOUT)
    }

    pub fn reconciler(&self, cluster: &Cluster) -> Reconciler {
        Reconciler::for_cluster(cluster, self.provider.clone(), self.catalog.clone(), TIMEOUT)
    }
}
