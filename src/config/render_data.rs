//! Template binding assembly: the flat key/value mapping the manifest
//! templates render against.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::crd::{AntreaInstallSpec, OperatorNetworkSpec};
use crate::RELEASE_VERSION;

// CNI directories on plain hosts.
const SYSTEM_CNI_CONF_DIR: &str = "/etc/cni/net.d";
const SYSTEM_CNI_BIN_DIR: &str = "/opt/cni/bin";

// CNI directories when the cluster network is managed through Multus.
const MULTUS_CNI_CONF_DIR: &str = "/etc/kubernetes/cni/net.d";
const MANAGED_CNI_BIN_DIR: &str = "/var/lib/cni/bin";

/// Flat string bindings handed to the manifest templates.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RenderData {
    values: BTreeMap<String, String>,
}

impl RenderData {
    fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Look up a binding by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Build the template bindings from a filled configuration.
///
/// The CNI directories depend on how the host manages its network plugins:
/// with a managed operator network the conf dir follows whether Multus is
/// enabled, and the bin dir moves under `/var/lib`.
pub fn build_render_data(
    operator_network: Option<&OperatorNetworkSpec>,
    config: &AntreaInstallSpec,
) -> RenderData {
    let (conf_dir, bin_dir) = match operator_network {
        None => (SYSTEM_CNI_CONF_DIR, SYSTEM_CNI_BIN_DIR),
        Some(net) if net.multi_network_enabled() => (MULTUS_CNI_CONF_DIR, MANAGED_CNI_BIN_DIR),
        Some(_) => (SYSTEM_CNI_CONF_DIR, MANAGED_CNI_BIN_DIR),
    };

    let mut data = RenderData::default();
    data.insert("ReleaseVersion", RELEASE_VERSION);
    data.insert("AntreaAgentConfig", &config.antrea_agent_config);
    data.insert("AntreaCNIConfig", &config.antrea_cni_config);
    data.insert("AntreaControllerConfig", &config.antrea_controller_config);
    data.insert("AntreaImage", &config.antrea_image);
    data.insert("CNIConfDir", conf_dir);
    data.insert("CNIBinDir", bin_dir);
    data
}
