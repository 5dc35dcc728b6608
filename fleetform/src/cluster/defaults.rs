//! Cluster-wide defaults.
//!
//! [`render`] turns a possibly incomplete cluster into a self-consistent one.
//! It never talks to the provider and `render(&render(c)) == render(c)`.

use super::Cluster;

pub const DEFAULT_LOCATION: &str = "eastus";
pub const DEFAULT_SIZE: &str = "Standard_DS2_v2";

/// Recomputes derived defaults and returns a new cluster.
pub fn render(cluster: &Cluster) -> Cluster {
    let mut next = cluster.clone();

    if next.location.is_empty() {
        next.location = DEFAULT_LOCATION.to_string();
    }

    for pool in &mut next.server_pools {
        if pool.size.is_empty() {
            pool.size = DEFAULT_SIZE.to_string();
        }
        if pool.max_count == 0 {
            pool.max_count = pool.min_count.max(1);
        }
        if pool.min_count > pool.max_count {
            pool.max_count = pool.min_count;
        }
        for (i, subnet) in pool.subnets.iter_mut().enumerate() {
            if subnet.name.is_empty() {
                subnet.name = format!("{}-{}", pool.name, i);
            }
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ServerPool, ServerPoolType, Subnet};
    use std::collections::BTreeMap;

    fn sparse() -> Cluster {
        Cluster {
            name: "kube".to_string(),
            location: String::new(),
            group_identifier: String::new(),
            server_pools: vec![
                ServerPool {
                    name: "kube-master".to_string(),
                    pool_type: ServerPoolType::Master,
                    identifier: String::new(),
                    image: "ubuntu-16.04-x64".to_string(),
                    size: String::new(),
                    min_count: 0,
                    max_count: 0,
                    subnets: vec![Subnet::default(), Subnet::default()],
                    tags: BTreeMap::new(),
                },
                ServerPool {
                    name: "kube-node".to_string(),
                    pool_type: ServerPoolType::Node,
                    identifier: "/vmss/node".to_string(),
                    image: "ubuntu-16.04-x64".to_string(),
                    size: "Standard_A1".to_string(),
                    min_count: 5,
                    max_count: 3,
                    subnets: vec![],
                    tags: BTreeMap::new(),
                },
            ],
            load_balancers: vec![],
        }
    }

    #[test]
    fn test_render_fills_defaults() {
        let rendered = render(&sparse());

        assert_eq!(rendered.location, DEFAULT_LOCATION);
        let master = &rendered.server_pools[0];
        assert_eq!(master.size, DEFAULT_SIZE);
        assert_eq!(master.max_count, 1);
        assert_eq!(master.subnets[0].name, "kube-master-0");
        assert_eq!(master.subnets[1].name, "kube-master-1");

        let node = &rendered.server_pools[1];
        assert_eq!(node.size, "Standard_A1");
        assert_eq!(node.max_count, 5);
        assert_eq!(node.identifier, "/vmss/node");
    }

    #[test]
    fn test_render_is_idempotent() {
        let once = render(&sparse());
        let twice = render(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_render_does_not_touch_input() {
        let input = sparse();
        let _ = render(&input);
        assert_eq!(input, sparse());
    }
}
