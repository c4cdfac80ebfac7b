//! Configuration merger: fills defaults derived from live cluster facts
//! into the install CR spec.

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::crd::{AntreaInstallSpec, NetworkSpec, PlatformCapabilities};
use crate::{Error, Result, DEFAULT_ANTREA_IMAGE, DEFAULT_MTU};

use super::{parse_config_mapping, DEFAULT_MTU_OPTION, SERVICE_CIDR_OPTION};

// Controller config option names (nodeIPAM subtree)
const FEATURE_GATES_OPTION: &str = "featureGates";
const NODE_IPAM_FEATURE: &str = "NodeIPAM";
const NODE_IPAM_OPTION: &str = "nodeIPAM";
const ENABLE_NODE_IPAM_OPTION: &str = "enableNodeIPAM";
const CLUSTER_CIDRS_OPTION: &str = "clusterCIDRs";
const NODE_CIDR_MASK_V4_OPTION: &str = "nodeCIDRMaskSizeIPv4";
const NODE_CIDR_MASK_V6_OPTION: &str = "nodeCIDRMaskSizeIPv6";
const NODE_IPAM_SERVICE_CIDR_OPTION: &str = "serviceCIDR";
const NODE_IPAM_SERVICE_CIDR_V6_OPTION: &str = "serviceCIDRv6";

/// Fill default configurations into `config`, in place.
///
/// After a successful call the agent config always carries a serviceCIDR
/// and defaultMTU entry and the image reference is non-empty. On platforms
/// whose capabilities require controller-side node IPAM, the controller
/// config is populated from the cluster network facts as well.
///
/// Calling this twice on an unchanged, already-filled configuration is a
/// no-op: the re-serialized blobs come out byte-identical.
pub fn fill_configs(
    caps: PlatformCapabilities,
    cluster: Option<&NetworkSpec>,
    config: &mut AntreaInstallSpec,
) -> Result<()> {
    fill_agent_config(cluster, config)?;

    if caps.needs_controller_node_ipam {
        fill_controller_config(cluster, config)?;
    }

    if config.antrea_image.is_empty() {
        config.antrea_image = DEFAULT_ANTREA_IMAGE.to_string();
    }

    Ok(())
}

fn fill_agent_config(
    cluster: Option<&NetworkSpec>,
    config: &mut AntreaInstallSpec,
) -> Result<()> {
    let mut agent = parse_config_mapping(&config.antrea_agent_config, "AntreaAgentConfig")?;

    // Set service CIDR.
    match cluster {
        None => {
            if !agent.contains_key(SERVICE_CIDR_OPTION) {
                return Err(Error::validation(
                    "serviceCIDR must be specified on kubernetes",
                ));
            }
        }
        Some(cluster) => {
            let primary = cluster.service_network.first().ok_or_else(|| {
                Error::validation("cluster network config has no service network entries")
            })?;
            match agent.get(SERVICE_CIDR_OPTION).and_then(Value::as_str) {
                Some(cidr) if cluster.service_network.iter().any(|c| c == cidr) => {}
                Some(cidr) => {
                    warn!(
                        configured = %cidr,
                        cluster = %primary,
                        "serviceCIDR is overwritten by cluster config"
                    );
                    agent.insert(
                        Value::from(SERVICE_CIDR_OPTION),
                        Value::from(primary.clone()),
                    );
                }
                None => {
                    debug!(cidr = %primary, "defaulting serviceCIDR from cluster config");
                    agent.insert(
                        Value::from(SERVICE_CIDR_OPTION),
                        Value::from(primary.clone()),
                    );
                }
            }
        }
    }

    // Set default MTU.
    if !agent.contains_key(DEFAULT_MTU_OPTION) {
        agent.insert(Value::from(DEFAULT_MTU_OPTION), Value::from(DEFAULT_MTU));
    }

    config.antrea_agent_config = serde_yaml::to_string(&Value::Mapping(agent))
        .map_err(|e| Error::parse(format!("failed to fill AntreaAgentConfig: {e}")))?;
    Ok(())
}

fn fill_controller_config(
    cluster: Option<&NetworkSpec>,
    config: &mut AntreaInstallSpec,
) -> Result<()> {
    let mut controller =
        parse_config_mapping(&config.antrea_controller_config, "AntreaControllerConfig")?;

    // Turn on the NodeIPAM feature gate.
    let mut gates = match controller.get(FEATURE_GATES_OPTION) {
        Some(Value::Mapping(m)) => m.clone(),
        _ => Mapping::new(),
    };
    gates.insert(Value::from(NODE_IPAM_FEATURE), Value::from(true));
    controller.insert(Value::from(FEATURE_GATES_OPTION), Value::Mapping(gates));

    let mut node_ipam = match controller.get(NODE_IPAM_OPTION) {
        Some(Value::Mapping(m)) => m.clone(),
        _ => Mapping::new(),
    };
    node_ipam.insert(Value::from(ENABLE_NODE_IPAM_OPTION), Value::from(true));

    if let Some(cluster) = cluster {
        // One cluster CIDR per address family: the first IPv4 and the first
        // IPv6 entry win, subsequent entries of the same family are ignored.
        let mut cluster_cidrs: Vec<Value> = Vec::new();
        let mut v4_found = false;
        let mut v6_found = false;
        for entry in &cluster.cluster_network {
            if is_ipv4_cidr(&entry.cidr) {
                if !v4_found {
                    v4_found = true;
                    cluster_cidrs.push(Value::from(entry.cidr.clone()));
                    node_ipam.insert(
                        Value::from(NODE_CIDR_MASK_V4_OPTION),
                        Value::from(entry.host_prefix as i64),
                    );
                }
            } else if !v6_found {
                v6_found = true;
                cluster_cidrs.push(Value::from(entry.cidr.clone()));
                node_ipam.insert(
                    Value::from(NODE_CIDR_MASK_V6_OPTION),
                    Value::from(entry.host_prefix as i64),
                );
            }
        }
        if !cluster_cidrs.is_empty() {
            node_ipam.insert(
                Value::from(CLUSTER_CIDRS_OPTION),
                Value::Sequence(cluster_cidrs),
            );
        }

        // Service CIDR, again one per family.
        v4_found = false;
        v6_found = false;
        for cidr in &cluster.service_network {
            if is_ipv4_cidr(cidr) {
                if !v4_found {
                    v4_found = true;
                    node_ipam.insert(
                        Value::from(NODE_IPAM_SERVICE_CIDR_OPTION),
                        Value::from(cidr.clone()),
                    );
                }
            } else if !v6_found {
                v6_found = true;
                node_ipam.insert(
                    Value::from(NODE_IPAM_SERVICE_CIDR_V6_OPTION),
                    Value::from(cidr.clone()),
                );
            }
        }
    }

    controller.insert(Value::from(NODE_IPAM_OPTION), Value::Mapping(node_ipam));

    config.antrea_controller_config = serde_yaml::to_string(&Value::Mapping(controller))
        .map_err(|e| Error::parse(format!("failed to fill AntreaControllerConfig: {e}")))?;
    Ok(())
}

/// Whether a CIDR string has an IPv4 address part. Anything unparseable is
/// treated as IPv6-like and falls into the "not v4" bucket, mirroring a
/// plain address-family split.
fn is_ipv4_cidr(cidr: &str) -> bool {
    cidr.split('/')
        .next()
        .and_then(|addr| addr.parse::<std::net::IpAddr>().ok())
        .map(|addr| addr.is_ipv4())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterNetworkEntry, Platform};

    fn sample_cluster() -> NetworkSpec {
        NetworkSpec {
            service_network: vec!["10.96.0.0/12".to_string()],
            cluster_network: vec![ClusterNetworkEntry {
                cidr: "192.168.0.0/16".to_string(),
                host_prefix: 24,
            }],
            network_type: "antrea".to_string(),
        }
    }

    fn sample_install(platform: Platform) -> AntreaInstallSpec {
        AntreaInstallSpec {
            antrea_agent_config: "serviceCIDR: 10.96.0.0/12\n".to_string(),
            antrea_cni_config: String::new(),
            antrea_controller_config: "apiPort: 10349\n".to_string(),
            antrea_image: String::new(),
            antrea_platform: platform,
        }
    }

    fn agent_mapping(config: &AntreaInstallSpec) -> Mapping {
        parse_config_mapping(&config.antrea_agent_config, "AntreaAgentConfig").unwrap()
    }

    fn controller_mapping(config: &AntreaInstallSpec) -> Mapping {
        parse_config_mapping(&config.antrea_controller_config, "AntreaControllerConfig").unwrap()
    }

    #[test]
    fn test_fill_defaults_with_cluster_facts() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        let agent = agent_mapping(&config);
        assert_eq!(
            agent.get(SERVICE_CIDR_OPTION).and_then(Value::as_str),
            Some("10.96.0.0/12")
        );
        assert_eq!(
            agent.get(DEFAULT_MTU_OPTION).and_then(Value::as_i64),
            Some(DEFAULT_MTU)
        );
        assert_eq!(config.antrea_image, DEFAULT_ANTREA_IMAGE);
    }

    #[test]
    fn test_fill_defaults_without_cluster_facts() {
        let mut config = sample_install(Platform::Kubernetes);

        fill_configs(Platform::Kubernetes.capabilities(), None, &mut config).unwrap();

        let agent = agent_mapping(&config);
        assert_eq!(
            agent.get(DEFAULT_MTU_OPTION).and_then(Value::as_i64),
            Some(DEFAULT_MTU)
        );
        assert_eq!(config.antrea_image, DEFAULT_ANTREA_IMAGE);
        // Controller config is left alone on plain kubernetes.
        assert!(!controller_mapping(&config).contains_key(NODE_IPAM_OPTION));
    }

    #[test]
    fn test_fill_requires_service_cidr_without_cluster_facts() {
        let mut config = sample_install(Platform::Kubernetes);
        config.antrea_agent_config = String::new();

        let err = fill_configs(Platform::Kubernetes.capabilities(), None, &mut config).unwrap_err();
        assert!(err.to_string().contains("serviceCIDR must be specified"));
    }

    #[test]
    fn test_fill_defaults_missing_service_cidr_from_cluster() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);
        config.antrea_agent_config = String::new();

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        let agent = agent_mapping(&config);
        assert_eq!(
            agent.get(SERVICE_CIDR_OPTION).and_then(Value::as_str),
            Some("10.96.0.0/12")
        );
    }

    #[test]
    fn test_fill_overwrites_mismatched_service_cidr() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);
        config.antrea_agent_config = "serviceCIDR: 1.2.3.0/24\n".to_string();

        // An out-of-cluster CIDR is overwritten, not rejected.
        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        let agent = agent_mapping(&config);
        assert_eq!(
            agent.get(SERVICE_CIDR_OPTION).and_then(Value::as_str),
            Some("10.96.0.0/12")
        );
    }

    #[test]
    fn test_fill_preserves_existing_mtu() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);
        config.antrea_agent_config = "serviceCIDR: 10.96.0.0/12\ndefaultMTU: 9000\n".to_string();

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        let agent = agent_mapping(&config);
        assert_eq!(
            agent.get(DEFAULT_MTU_OPTION).and_then(Value::as_i64),
            Some(9000)
        );
    }

    #[test]
    fn test_fill_populates_controller_node_ipam() {
        let cluster = NetworkSpec {
            service_network: vec!["10.96.0.0/12".to_string(), "fd02::/112".to_string()],
            cluster_network: vec![
                ClusterNetworkEntry {
                    cidr: "192.168.0.0/16".to_string(),
                    host_prefix: 24,
                },
                ClusterNetworkEntry {
                    cidr: "10.128.0.0/14".to_string(),
                    host_prefix: 23,
                },
                ClusterNetworkEntry {
                    cidr: "fd01::/48".to_string(),
                    host_prefix: 64,
                },
            ],
            network_type: "antrea".to_string(),
        };
        let mut config = sample_install(Platform::Openshift);

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        let controller = controller_mapping(&config);
        let gates = controller
            .get(FEATURE_GATES_OPTION)
            .and_then(Value::as_mapping)
            .unwrap();
        assert_eq!(gates.get(NODE_IPAM_FEATURE), Some(&Value::from(true)));

        let node_ipam = controller
            .get(NODE_IPAM_OPTION)
            .and_then(Value::as_mapping)
            .unwrap();
        assert_eq!(
            node_ipam.get(ENABLE_NODE_IPAM_OPTION),
            Some(&Value::from(true))
        );
        // First entry per family wins; the second IPv4 CIDR is ignored.
        let cidrs = node_ipam
            .get(CLUSTER_CIDRS_OPTION)
            .and_then(Value::as_sequence)
            .unwrap();
        assert_eq!(
            cidrs,
            &vec![Value::from("192.168.0.0/16"), Value::from("fd01::/48")]
        );
        assert_eq!(
            node_ipam.get(NODE_CIDR_MASK_V4_OPTION).and_then(Value::as_i64),
            Some(24)
        );
        assert_eq!(
            node_ipam.get(NODE_CIDR_MASK_V6_OPTION).and_then(Value::as_i64),
            Some(64)
        );
        assert_eq!(
            node_ipam
                .get(NODE_IPAM_SERVICE_CIDR_OPTION)
                .and_then(Value::as_str),
            Some("10.96.0.0/12")
        );
        assert_eq!(
            node_ipam
                .get(NODE_IPAM_SERVICE_CIDR_V6_OPTION)
                .and_then(Value::as_str),
            Some("fd02::/112")
        );
        // The user-supplied option is preserved alongside the filled ones.
        assert_eq!(controller.get("apiPort").and_then(Value::as_i64), Some(10349));
    }

    #[test]
    fn test_fill_is_idempotent() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();
        let first = config.clone();

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        assert_eq!(config, first);
    }

    #[test]
    fn test_fill_rejects_malformed_agent_config() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);
        config.antrea_agent_config = "serviceCIDR:---".to_string();

        let err = fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to parse AntreaAgentConfig"));
    }

    #[test]
    fn test_fill_keeps_user_supplied_image() {
        let cluster = sample_cluster();
        let mut config = sample_install(Platform::Openshift);
        config.antrea_image = "registry.example.com/antrea:v1.0".to_string();

        fill_configs(
            Platform::Openshift.capabilities(),
            Some(&cluster),
            &mut config,
        )
        .unwrap();

        assert_eq!(config.antrea_image, "registry.example.com/antrea:v1.0");
    }

    #[test]
    fn test_is_ipv4_cidr() {
        assert!(is_ipv4_cidr("10.0.0.0/8"));
        assert!(!is_ipv4_cidr("fd00::/64"));
        assert!(!is_ipv4_cidr("not-a-cidr"));
    }
}
