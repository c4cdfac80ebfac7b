//! ClusterOperator status object (config.openshift.io/v1)
//!
//! On OpenShift-style platforms the operator reports health through a
//! ClusterOperator instance in addition to the install CR's own status
//! subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// ClusterOperator spec; carries no desired state for this operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterOperator",
    plural = "clusteroperators",
    status = "ClusterOperatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorSpec {}

/// Reference to a resource the operator manages, surfaced for observability
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API group of the referenced object
    #[serde(default)]
    pub group: String,

    /// Plural resource name of the referenced object
    #[serde(default)]
    pub resource: String,

    /// Namespace, empty for cluster-scoped objects
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Object name
    #[serde(default)]
    pub name: String,
}

/// Version of an operand reported on the ClusterOperator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandVersion {
    /// Operand name (e.g. "operator")
    pub name: String,

    /// Version string
    pub version: String,
}

/// Status of the ClusterOperator object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    /// Health conditions (Degraded, Progressing, Available, Upgradeable)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operand versions most recently rolled out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<OperandVersion>,

    /// Objects this operator manages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<ObjectReference>,
}
