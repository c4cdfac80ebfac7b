//! Network operator configuration object (operator.openshift.io/v1)
//!
//! Only the multi-network knob matters to this operator: it selects which
//! CNI configuration directory the rendered manifests point at.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification of the operator Network object
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "Network",
    plural = "networks"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Disables the multi-network (Multus) layer when set to true.
    /// Absent means multi-network support is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_multi_network: Option<bool>,
}

impl NetworkSpec {
    /// Whether the multi-network layer is active for this cluster
    pub fn multi_network_enabled(&self) -> bool {
        !self.disable_multi_network.unwrap_or(false)
    }
}
