//! Shared condition and platform types

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Standard condition type reported when the operator believes its managed
/// component is unhealthy
pub const CONDITION_DEGRADED: &str = "Degraded";
/// Standard condition type reported while a rollout is in flight
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// Standard condition type reported once the operand is serving
pub const CONDITION_AVAILABLE: &str = "Available";
/// Standard condition type; always true for this operator
pub const CONDITION_UPGRADEABLE: &str = "Upgradeable";

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition state cannot be determined
    Unknown,
}

/// Standard status condition as surfaced on the install CR and the
/// ClusterOperator object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. Degraded, Available)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Compare conditions ignoring the transition timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace a condition of the same type in a condition list.
///
/// The transition timestamp of an existing condition is preserved when only
/// the reason/message change but the status does not, matching the standard
/// cluster-operator condition semantics.
///
/// Returns true if the list changed in an externally observable way.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) {
        if existing.same_state(&new) {
            return false;
        }
        if existing.status == new.status {
            new.last_transition_time = existing.last_transition_time;
        }
        *existing = new;
        return true;
    }
    conditions.push(new);
    true
}

/// Target platform for the Antrea deployment
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Plain Kubernetes: no central cluster network object exists, the
    /// service CIDR must be supplied in the install CR
    Kubernetes,
    /// OpenShift-style platform with central cluster network configuration
    /// and a ClusterOperator status object
    Openshift,
}

impl Platform {
    /// Derive the capability descriptor driving the reconciliation engine
    pub fn capabilities(self) -> PlatformCapabilities {
        match self {
            Platform::Kubernetes => PlatformCapabilities {
                has_cluster_network_facts: false,
                needs_controller_node_ipam: false,
            },
            Platform::Openshift => PlatformCapabilities {
                has_cluster_network_facts: true,
                needs_controller_node_ipam: true,
            },
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" => Ok(Platform::Kubernetes),
            "openshift" => Ok(Platform::Openshift),
            other => Err(crate::Error::validation(format!(
                "invalid platform: {other}, platform should be openshift or kubernetes"
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Kubernetes => write!(f, "kubernetes"),
            Platform::Openshift => write!(f, "openshift"),
        }
    }
}

/// Capability descriptor parameterizing the reconciliation engine.
///
/// A single engine consults this descriptor instead of carrying duplicated
/// per-platform code paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// A central cluster network object exists and must be cross-referenced
    pub has_cluster_network_facts: bool,
    /// The controller config must carry node IPAM settings derived from the
    /// cluster network facts
    pub needs_controller_node_ipam: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_str() {
        assert_eq!(
            "kubernetes".parse::<Platform>().unwrap(),
            Platform::Kubernetes
        );
        assert_eq!("openshift".parse::<Platform>().unwrap(), Platform::Openshift);
        assert!("bare-metal".parse::<Platform>().is_err());
    }

    #[test]
    fn test_capabilities_per_platform() {
        let k8s = Platform::Kubernetes.capabilities();
        assert!(!k8s.has_cluster_network_facts);
        assert!(!k8s.needs_controller_node_ipam);

        let oc = Platform::Openshift.capabilities();
        assert!(oc.has_cluster_network_facts);
        assert!(oc.needs_controller_node_ipam);
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_DEGRADED,
                ConditionStatus::True,
                "ApplyObjectsError",
                "apply failed",
            ),
        );
        set_condition(
            &mut conditions,
            Condition::new(CONDITION_DEGRADED, ConditionStatus::False, "", ""),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn test_set_condition_keeps_timestamp_without_status_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_DEGRADED,
                ConditionStatus::True,
                "NoClusterConfig",
                "Cluster Network CR not found",
            ),
        );
        let first_transition = conditions[0].last_transition_time;

        let changed = set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_DEGRADED,
                ConditionStatus::True,
                "ApplyObjectsError",
                "apply failed",
            ),
        );

        assert!(changed);
        assert_eq!(conditions[0].last_transition_time, first_transition);
        assert_eq!(conditions[0].reason, "ApplyObjectsError");
    }

    #[test]
    fn test_set_condition_reports_no_change_for_same_state() {
        let mut conditions = Vec::new();
        let cond = Condition::new(CONDITION_UPGRADEABLE, ConditionStatus::True, "", "");
        assert!(set_condition(&mut conditions, cond.clone()));
        assert!(!set_condition(&mut conditions, cond));
    }
}
