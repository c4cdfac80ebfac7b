//! Change detection between the last applied configuration and the
//! freshly filled one. The answers here drive whether manifests are
//! re-applied and whether already-running pods must be recycled.

use serde_yaml::Value;

use crate::crd::{AntreaInstallSpec, NetworkSpec};
use crate::{Error, Result};

use super::{parse_config_mapping, DEFAULT_MTU_OPTION};

/// Which deployed pieces a configuration change invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSet {
    /// Agent DaemonSet configuration changed.
    pub agent_changed: bool,
    /// Controller Deployment configuration changed.
    pub controller_changed: bool,
    /// The Antrea image changed.
    pub image_changed: bool,
}

impl ChangeSet {
    /// True when anything at all changed.
    pub fn needs_apply(&self) -> bool {
        self.agent_changed || self.controller_changed || self.image_changed
    }
}

/// Compare the prior applied configuration against the current one.
///
/// With no prior configuration everything except the image is considered
/// changed: a first pass must apply, but stale-pod deletion keyed off the
/// image flag must not fire.
pub fn detect_change(
    prior: Option<&AntreaInstallSpec>,
    current: &AntreaInstallSpec,
) -> ChangeSet {
    let Some(prior) = prior else {
        return ChangeSet {
            agent_changed: true,
            controller_changed: true,
            image_changed: false,
        };
    };

    let image_changed = prior.antrea_image != current.antrea_image;
    ChangeSet {
        agent_changed: image_changed
            || prior.antrea_agent_config != current.antrea_agent_config
            || prior.antrea_cni_config != current.antrea_cni_config,
        controller_changed: image_changed
            || prior.antrea_controller_config != current.antrea_controller_config,
        image_changed,
    }
}

// Order-insensitive equality for CIDR lists of the same length.
fn same_cidr_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|c| b.contains(c))
}

/// Whether the cluster network facts changed in a way the operator must
/// react to: the service CIDR set or the pod CIDR set, compared as sets.
///
/// A missing prior always counts as a change.
pub fn has_cluster_network_change(
    prior: Option<&NetworkSpec>,
    current: &NetworkSpec,
) -> bool {
    let Some(prior) = prior else {
        return true;
    };

    if !same_cidr_set(&prior.service_network, &current.service_network) {
        return true;
    }
    let prior_pods: Vec<String> = prior.cluster_network.iter().map(|e| e.cidr.clone()).collect();
    let current_pods: Vec<String> = current
        .cluster_network
        .iter()
        .map(|e| e.cidr.clone())
        .collect();
    !same_cidr_set(&prior_pods, &current_pods)
}

fn default_mtu_of(config: &AntreaInstallSpec) -> Result<i64> {
    let agent = parse_config_mapping(&config.antrea_agent_config, "AntreaAgentConfig")?;
    agent
        .get(DEFAULT_MTU_OPTION)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::internal("defaultMTU option can not be empty"))
}

/// Whether the agent MTU changed since the last pass, returning the
/// current value alongside.
///
/// A filled configuration always carries an MTU, so a missing value in
/// either side is an error rather than "no change".
pub fn has_default_mtu_change(
    prior: Option<&AntreaInstallSpec>,
    current: &AntreaInstallSpec,
) -> Result<(bool, i64)> {
    let current_mtu = default_mtu_of(current)?;
    match prior {
        None => Ok((true, current_mtu)),
        Some(prior) => {
            let prior_mtu = default_mtu_of(prior)?;
            Ok((prior_mtu != current_mtu, current_mtu))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterNetworkEntry, Platform};

    fn install(agent: &str, cni: &str, controller: &str, image: &str) -> AntreaInstallSpec {
        AntreaInstallSpec {
            antrea_agent_config: agent.to_string(),
            antrea_cni_config: cni.to_string(),
            antrea_controller_config: controller.to_string(),
            antrea_image: image.to_string(),
            antrea_platform: Platform::Openshift,
        }
    }

    fn network(services: &[&str], pods: &[&str]) -> NetworkSpec {
        NetworkSpec {
            service_network: services.iter().map(|s| s.to_string()).collect(),
            cluster_network: pods
                .iter()
                .map(|c| ClusterNetworkEntry {
                    cidr: c.to_string(),
                    host_prefix: 24,
                })
                .collect(),
            network_type: "antrea".to_string(),
        }
    }

    #[test]
    fn test_first_pass_applies_everything_without_pod_recycling() {
        let current = install("a: 1\n", "", "", "img");
        let change = detect_change(None, &current);
        assert!(change.agent_changed);
        assert!(change.controller_changed);
        assert!(!change.image_changed);
        assert!(change.needs_apply());
    }

    #[test]
    fn test_identical_configs_report_no_change() {
        let prior = install("a: 1\n", "cni: x\n", "c: 2\n", "img");
        let current = prior.clone();
        let change = detect_change(Some(&prior), &current);
        assert!(!change.needs_apply());
    }

    #[test]
    fn test_agent_config_change_is_scoped_to_agent() {
        let prior = install("a: 1\n", "", "c: 2\n", "img");
        let current = install("a: 2\n", "", "c: 2\n", "img");
        let change = detect_change(Some(&prior), &current);
        assert!(change.agent_changed);
        assert!(!change.controller_changed);
        assert!(!change.image_changed);
    }

    #[test]
    fn test_cni_config_change_counts_as_agent_change() {
        let prior = install("a: 1\n", "cni: x\n", "", "img");
        let current = install("a: 1\n", "cni: y\n", "", "img");
        let change = detect_change(Some(&prior), &current);
        assert!(change.agent_changed);
        assert!(!change.controller_changed);
    }

    #[test]
    fn test_image_change_invalidates_both_workloads() {
        let prior = install("a: 1\n", "", "c: 2\n", "img:v1");
        let current = install("a: 1\n", "", "c: 2\n", "img:v2");
        let change = detect_change(Some(&prior), &current);
        assert!(change.agent_changed);
        assert!(change.controller_changed);
        assert!(change.image_changed);
    }

    #[test]
    fn test_cluster_network_reordering_is_not_a_change() {
        let prior = network(&["10.96.0.0/12", "fd02::/112"], &["192.168.0.0/16"]);
        let current = network(&["fd02::/112", "10.96.0.0/12"], &["192.168.0.0/16"]);
        assert!(!has_cluster_network_change(Some(&prior), &current));
    }

    #[test]
    fn test_cluster_network_cidr_change_is_detected() {
        let prior = network(&["10.96.0.0/12"], &["192.168.0.0/16"]);
        let current = network(&["10.96.0.0/12"], &["10.128.0.0/14"]);
        assert!(has_cluster_network_change(Some(&prior), &current));
    }

    #[test]
    fn test_cluster_network_host_prefix_change_is_ignored() {
        let mut prior = network(&["10.96.0.0/12"], &["192.168.0.0/16"]);
        let current = network(&["10.96.0.0/12"], &["192.168.0.0/16"]);
        prior.cluster_network[0].host_prefix = 23;
        assert!(!has_cluster_network_change(Some(&prior), &current));
    }

    #[test]
    fn test_missing_prior_cluster_network_is_a_change() {
        let current = network(&["10.96.0.0/12"], &["192.168.0.0/16"]);
        assert!(has_cluster_network_change(None, &current));
    }

    #[test]
    fn test_mtu_change_is_detected_with_new_value() {
        let prior = install("defaultMTU: 1500\n", "", "", "img");
        let current = install("defaultMTU: 1600\n", "", "", "img");
        assert_eq!(
            has_default_mtu_change(Some(&prior), &current).unwrap(),
            (true, 1600)
        );
    }

    #[test]
    fn test_equal_mtu_is_no_change() {
        let prior = install("defaultMTU: 1500\n", "", "", "img");
        let current = prior.clone();
        assert_eq!(
            has_default_mtu_change(Some(&prior), &current).unwrap(),
            (false, 1500)
        );
    }

    #[test]
    fn test_missing_mtu_is_an_error() {
        let prior = install("defaultMTU: 1500\n", "", "", "img");
        let current = install("a: 1\n", "", "", "img");
        let err = has_default_mtu_change(Some(&prior), &current).unwrap_err();
        assert!(err.to_string().contains("defaultMTU option can not be empty"));
    }

    #[test]
    fn test_missing_prior_reports_change_with_current_mtu() {
        let current = install("defaultMTU: 1450\n", "", "", "img");
        assert_eq!(has_default_mtu_change(None, &current).unwrap(), (true, 1450));
    }
}
