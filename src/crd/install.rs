//! AntreaInstall Custom Resource Definition
//!
//! The AntreaInstall CR is the desired-state configuration for the Antrea
//! deployment. The agent, CNI and controller configuration fields are
//! opaque blobs passed through to the rendered manifests; the agent and
//! controller blobs are YAML mappings the operator fills defaults into.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, Platform};

/// Specification for an AntreaInstall resource
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.antrea.vmware.com",
    version = "v1",
    kind = "AntreaInstall",
    plural = "antreainstalls",
    namespaced,
    status = "AntreaInstallStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.antreaImage"}"#,
    printcolumn = r#"{"name":"Platform","type":"string","jsonPath":".spec.antreaPlatform"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AntreaInstallSpec {
    /// antrea-agent configuration: a YAML mapping keyed by option name.
    /// The operator guarantees a serviceCIDR and defaultMTU entry after
    /// defaults are merged.
    #[serde(default)]
    pub antrea_agent_config: String,

    /// CNI configuration, passed through untouched
    #[serde(default, rename = "antreaCNIConfig")]
    pub antrea_cni_config: String,

    /// antrea-controller configuration: a YAML mapping keyed by option name
    #[serde(default)]
    pub antrea_controller_config: String,

    /// Antrea container image reference; defaulted when empty
    #[serde(default)]
    pub antrea_image: String,

    /// Target platform, selecting whether cluster network facts exist
    pub antrea_platform: Platform,
}

/// Status for an AntreaInstall resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AntreaInstallStatus {
    /// Conditions describing operator health (Degraded, Available, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
