//! Published cluster network status derived from the applied
//! configuration.

use crate::crd::{NetworkSpec, NetworkStatus};

/// Assemble the status the operator publishes on the cluster network
/// object: the CIDRs as configured, the network type, and the MTU the
/// agent actually runs with.
pub fn build_network_status(cluster: &NetworkSpec, default_mtu: i64) -> NetworkStatus {
    NetworkStatus {
        service_network: cluster.service_network.clone(),
        cluster_network: cluster.cluster_network.clone(),
        network_type: cluster.network_type.clone(),
        cluster_network_mtu: default_mtu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterNetworkEntry;

    #[test]
    fn test_status_mirrors_configured_network_and_mtu() {
        let cluster = NetworkSpec {
            service_network: vec!["10.96.0.0/12".to_string()],
            cluster_network: vec![ClusterNetworkEntry {
                cidr: "192.168.0.0/16".to_string(),
                host_prefix: 24,
            }],
            network_type: "antrea".to_string(),
        };

        let status = build_network_status(&cluster, 1450);
        assert_eq!(status.service_network, cluster.service_network);
        assert_eq!(status.cluster_network, cluster.cluster_network);
        assert_eq!(status.network_type, "antrea");
        assert_eq!(status.cluster_network_mtu, 1450);
    }
}
