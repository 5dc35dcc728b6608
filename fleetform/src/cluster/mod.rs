//! Cluster model - the declared shape of a cluster.
//!
//! A [`Cluster`] is never mutated in place by a reconciliation phase. Every
//! phase takes the current value by reference and hands back a new one, so
//! anyone still holding the previous value keeps a consistent view.

pub mod defaults;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Role of a server pool. The role decides which network wiring a pool gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerPoolType {
    Master,
    Node,
}

impl std::fmt::Display for ServerPoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerPoolType::Master => write!(f, "master"),
            ServerPoolType::Node => write!(f, "node"),
        }
    }
}

/// Load balancer pools a subnet is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetLoadBalancer {
    #[serde(default)]
    pub backend_ids: Vec<String>,
    #[serde(default)]
    pub nat_ids: Vec<String>,
}

/// A subnet owned by exactly one server pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(default)]
    pub name: String,
    /// Provider identifier, empty until the subnet is provisioned.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub load_balancer: SubnetLoadBalancer,
}

/// A provisioned (or to-be-provisioned) load balancer and the pools it exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub backend_pool_ids: Vec<String>,
    #[serde(default)]
    pub nat_pool_ids: Vec<String>,
}

impl LoadBalancer {
    pub fn is_provisioned(&self) -> bool {
        !self.identifier.is_empty()
    }
}

/// A named group of instances sharing a role, image and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPool {
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: ServerPoolType,
    /// Provider identifier of the pool's scale set, empty until created.
    #[serde(default)]
    pub identifier: String,
    /// Abstract image name, resolved through the catalog at apply time.
    pub image: String,
    /// Abstract size class, resolved through the catalog at apply time.
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub min_count: u32,
    #[serde(default)]
    pub max_count: u32,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ServerPool {
    pub fn is_master(&self) -> bool {
        self.pool_type == ServerPoolType::Master
    }
}

/// The whole cluster: location, resource group, pools and load balancers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub location: String,
    /// Provider identifier of the cluster's resource group.
    #[serde(default)]
    pub group_identifier: String,
    #[serde(default)]
    pub server_pools: Vec<ServerPool>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancer>,
}

impl Cluster {
    pub fn server_pool(&self, name: &str) -> Option<&ServerPool> {
        self.server_pools.iter().find(|p| p.name == name)
    }

    /// Master pools, in declaration order.
    pub fn master_pools(&self) -> impl Iterator<Item = &ServerPool> {
        self.server_pools.iter().filter(|p| p.is_master())
    }

    /// Returns a copy with the named pool's identifier replaced.
    ///
    /// Unknown pool names leave the copy unchanged.
    pub fn with_pool_identifier(&self, pool: &str, identifier: &str) -> Cluster {
        let mut next = self.clone();
        if let Some(p) = next.server_pools.iter_mut().find(|p| p.name == pool) {
            p.identifier = identifier.to_string();
        }
        next
    }

    /// Returns a copy with the resource group identifier replaced.
    pub fn with_group_identifier(&self, identifier: &str) -> Cluster {
        Cluster {
            group_identifier: identifier.to_string(),
            ..self.clone()
        }
    }

    /// The provisioned load balancer exposing a backend pool id.
    pub fn backend_pool_owner(&self, id: &str) -> Option<&LoadBalancer> {
        self.load_balancers
            .iter()
            .filter(|lb| lb.is_provisioned())
            .find(|lb| lb.backend_pool_ids.iter().any(|b| b == id))
    }

    /// The provisioned load balancer exposing a NAT pool id.
    pub fn nat_pool_owner(&self, id: &str) -> Option<&LoadBalancer> {
        self.load_balancers
            .iter()
            .filter(|lb| lb.is_provisioned())
            .find(|lb| lb.nat_pool_ids.iter().any(|n| n == id))
    }
}
