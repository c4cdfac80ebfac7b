//! Cluster-wide Network configuration object (config.openshift.io/v1)
//!
//! Read-only source of live cluster network facts: the service CIDRs, the
//! pod network entries and the network type. The operator writes back a
//! derived `status` projection after a successful pass.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One pod network CIDR with the per-node host prefix length
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    /// Pod network CIDR
    pub cidr: String,

    /// Prefix length assigned to each node out of this CIDR
    #[serde(default)]
    pub host_prefix: u32,
}

/// Specification of the cluster Network object
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Network",
    plural = "networks",
    status = "NetworkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Service network CIDRs, first entry is primary
    #[serde(default)]
    pub service_network: Vec<String>,

    /// Pod network entries, one per address family
    #[serde(default)]
    pub cluster_network: Vec<ClusterNetworkEntry>,

    /// Network plugin identifier
    #[serde(default)]
    pub network_type: String,
}

/// Observed network state, written by this operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Service network CIDRs in use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_network: Vec<String>,

    /// Pod network entries in use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_network: Vec<ClusterNetworkEntry>,

    /// Network plugin identifier in use
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,

    /// MTU configured on the cluster network
    #[serde(default, rename = "clusterNetworkMTU")]
    pub cluster_network_mtu: i64,
}
